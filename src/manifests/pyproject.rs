use anyhow::{Context, Result};
use toml::value::Table;
use toml::Value;

use super::requirement_name;

#[derive(Default)]
struct DependencyCollector {
    names: Vec<String>,
}

impl DependencyCollector {
    fn push_requirement(&mut self, value: &Value) {
        if let Some(name) = value.as_str().and_then(requirement_name) {
            self.names.push(name);
        }
    }

    fn visit_requirement_list(&mut self, value: Option<&Value>) {
        if let Some(Value::Array(entries)) = value {
            for entry in entries {
                self.push_requirement(entry);
            }
        }
    }

    /// PEP 621 `[project]`: `dependencies` and every `optional-dependencies` group.
    fn visit_project(&mut self, project: &Table) {
        self.visit_requirement_list(project.get("dependencies"));
        if let Some(Value::Table(groups)) = project.get("optional-dependencies") {
            for group in groups.values() {
                self.visit_requirement_list(Some(group));
            }
        }
    }

    /// Poetry dependency tables map names to a version string or an inline table.
    fn visit_poetry_table(&mut self, table: Option<&Value>) {
        if let Some(Value::Table(dependencies)) = table {
            for name in dependencies.keys() {
                if !name.eq_ignore_ascii_case("python") {
                    self.names.push(name.clone());
                }
            }
        }
    }

    fn visit_poetry(&mut self, poetry: &Table) {
        self.visit_poetry_table(poetry.get("dependencies"));
        self.visit_poetry_table(poetry.get("dev-dependencies"));
        if let Some(Value::Table(groups)) = poetry.get("group") {
            for group in groups.values() {
                self.visit_poetry_table(group.get("dependencies"));
            }
        }
    }

    /// PEP 735 `[dependency-groups]`; `{include-group = ...}` entries are not names.
    fn visit_dependency_groups(&mut self, groups: &Table) {
        for group in groups.values() {
            self.visit_requirement_list(Some(group));
        }
    }

    fn visit_document(&mut self, document: &Table) {
        if let Some(Value::Table(project)) = document.get("project") {
            self.visit_project(project);
        }
        if let Some(Value::Table(tool)) = document.get("tool") {
            if let Some(Value::Table(poetry)) = tool.get("poetry") {
                self.visit_poetry(poetry);
            }
            if let Some(Value::Table(uv)) = tool.get("uv") {
                self.visit_requirement_list(uv.get("dev-dependencies"));
            }
        }
        if let Some(Value::Table(groups)) = document.get("dependency-groups") {
            self.visit_dependency_groups(groups);
        }
    }
}

/// Names declared by a `pyproject.toml`, PEP 621 and Poetry layouts alike.
pub fn parse(content: &str) -> Result<Vec<String>> {
    let document: Table = toml::from_str(content).context("Failed to parse TOML content")?;
    let mut collector = DependencyCollector::default();
    collector.visit_document(&document);
    Ok(collector.names)
}
