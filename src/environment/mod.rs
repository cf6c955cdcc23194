mod distribution;
mod editable;
mod locate;
mod marker;
mod requirement;
mod version;

pub use distribution::{
    get_distributions, process_dist_info, process_egg_info, Distribution, DistributionBuilder,
    MetadataKind,
};
pub use editable::find_editable_source;
pub use locate::{
    environment_name, find_venv_site_packages, infer_python_version, locate, resolve_env_path,
    EnvSelector, PythonEnvironment,
};
pub use marker::{compare_version, Marker, MarkerEnvironment, Operator};
pub use requirement::{canonicalize_name, Requirement};
pub use version::Version;

#[cfg(test)]
pub(crate) use distribution::tests::create_info_dir;
