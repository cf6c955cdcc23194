use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::report::SortKey;
use crate::scan::EditableMode;
use crate::why::DEFAULT_MAX_PATHS;

#[derive(Parser, Debug)]
#[command(
    name = "pkgsizer",
    version,
    about = "Measure how much disk space the packages of a Python environment take, and why they are installed.",
    after_long_help = "The environment is taken from --site-packages, --venv or --python, in that order;\n\
                       otherwise from $VIRTUAL_ENV, then from `python -m site`.",
    max_term_width = 98
)]
pub struct Opts {
    /// Enable verbose logging (can be used multiple times: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Read defaults from this file instead of searching for `pkgsizer.toml` in the
    /// current directory and its parents.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of worker threads for directory walks and network lookups.
    /// Defaults to the number of available CPUs.
    #[arg(long, short = 'j', global = true, value_name = "N")]
    pub jobs: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvArgs {
    /// Python interpreter whose environment to analyze.
    #[arg(long, value_name = "EXE")]
    pub python: Option<PathBuf>,

    /// Root of the virtual environment to analyze.
    #[arg(long, value_name = "DIR")]
    pub venv: Option<PathBuf>,

    /// site-packages directory to analyze.
    #[arg(long, value_name = "DIR")]
    pub site_packages: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputArgs {
    /// Write a JSON report to PATH (`-` for stdout).
    #[arg(long, value_name = "PATH")]
    pub json: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanArgs {
    /// Follow requirements at most N levels below the roots.
    #[arg(long, value_name = "N")]
    pub depth: Option<usize>,

    /// Break packages down into modules and subpackages, N levels deep.
    #[arg(long, value_name = "N")]
    pub module_depth: Option<usize>,

    /// How to treat editable installs.
    #[arg(long, value_enum, value_name = "MODE")]
    pub include_editable: Option<EditableMode>,

    /// Write an HTML report to PATH.
    #[arg(long, value_name = "PATH")]
    pub html: Option<PathBuf>,

    /// Print packages as a dependency tree instead of a table.
    #[arg(long)]
    pub tree: bool,

    /// Leave out files matching a glob pattern (can be used multiple times).
    #[arg(long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Show only the N largest packages.
    #[arg(long, value_name = "N")]
    pub top: Option<usize>,

    /// Sort key of the report.
    #[arg(long, value_enum, default_value_t = SortKey::Size)]
    pub by: SortKey,

    /// Size the targets of symbolic links instead of the links themselves.
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Exit with code 1 when the total size is above SIZE, e.g. `500MB` or `1.5GB`.
    #[arg(long, value_name = "SIZE")]
    pub fail_over: Option<String>,

    /// Also report each package's size including everything it pulls in.
    #[arg(long)]
    pub include_deps: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Measure every package installed in the environment.
    ScanEnv {
        /// Start from these packages instead of everything nothing else requires.
        #[arg(short = 'p', long = "package", value_name = "NAME")]
        packages: Vec<String>,

        #[command(flatten)]
        env: EnvArgs,
        #[command(flatten)]
        output: OutputArgs,
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Measure the packages a dependency file declares, and everything they require.
    AnalyzeFile {
        /// requirements.txt, pyproject.toml, poetry.lock, uv.lock or environment.yml
        file: PathBuf,

        #[command(flatten)]
        env: EnvArgs,
        #[command(flatten)]
        output: OutputArgs,
        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Show why a package is installed: what requires it and through which paths.
    Why {
        package: String,

        /// Show at most N dependency paths.
        #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_PATHS)]
        max_paths: usize,

        #[command(flatten)]
        env: EnvArgs,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Find installed packages that your code never imports.
    Unused {
        /// Directory of the sources to scan for imports.
        code_path: Option<PathBuf>,

        #[command(flatten)]
        env: EnvArgs,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Suggest lighter or more modern alternatives to installed packages.
    Alternatives {
        /// Only look at this package.
        package: Option<String>,

        /// List every package with known alternatives, installed or not.
        #[arg(long, conflicts_with = "package")]
        list_all: bool,

        #[command(flatten)]
        env: EnvArgs,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Check installed packages against their latest release on PyPI.
    Updates {
        /// Check these packages. Defaults to the packages nothing else requires.
        packages: Vec<String>,

        /// Check every installed package.
        #[arg(long, conflicts_with = "packages")]
        all: bool,

        /// Seconds to wait for each PyPI request.
        #[arg(long, value_name = "SECS", default_value_t = 5)]
        timeout: u64,

        /// Cache PyPI responses in DIR.
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,

        /// Seconds a cached response stays valid.
        #[arg(long, value_name = "SECS", default_value_t = 3600, requires = "cache_dir")]
        cache_ttl: u64,

        #[command(flatten)]
        env: EnvArgs,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Compare the packages of two environments.
    Compare {
        /// Virtual environment or site-packages directory.
        env1: PathBuf,
        /// Virtual environment or site-packages directory.
        env2: PathBuf,

        /// Name shown for the first environment.
        #[arg(long, value_name = "NAME")]
        name1: Option<String>,
        /// Name shown for the second environment.
        #[arg(long, value_name = "NAME")]
        name2: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },
}
