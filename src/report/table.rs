use std::collections::{BTreeSet, HashMap};
use std::io::Write;

use anyhow::Result;
use tabled::builder::Builder;
use tabled::settings::object::Columns;
use tabled::settings::{Alignment, Modify, Panel, Style};

use super::{format_size, rows, ReportOptions, Row};
use crate::scan::{EditableMode, PackageResult, ScanResult};
use crate::size::{SizeTotals, SubpackageNode};

fn edge_and_joint(is_last: bool) -> (char, char) {
    if is_last {
        (' ', '└')
    } else {
        ('│', '├')
    }
}

fn kind(package: &PackageResult) -> &'static str {
    if package.node.is_direct {
        "direct"
    } else {
        "transitive"
    }
}

fn summary(result: &ScanResult, shown: usize) -> String {
    let mut lines = vec![format!(
        "Total: {} in {} files across {} packages",
        format_size(result.total.bytes),
        result.total.files,
        result.packages.len()
    )];
    if shown < result.packages.len() {
        lines.push(format!("Showing the top {} packages", shown));
    }
    if result.warnings > 0 {
        lines.push(format!(
            "{} file(s) could not be read and were skipped",
            result.warnings
        ));
    }
    if result.truncated {
        lines.push(
            "Note: the depth limit cut off some dependencies; totals are partial".to_string(),
        );
    }
    lines.join("\n")
}

/// Print the scan as a table, one row per package.
pub fn print_table(
    result: &ScanResult,
    options: &ReportOptions,
    mut stdout: impl Write,
) -> Result<()> {
    let rows = rows(result, options);
    if rows.is_empty() {
        writeln!(stdout, "No packages found.")?;
        return Ok(());
    }

    let mark_editable = result.editable_mode == EditableMode::Mark;
    let mut builder = Builder::default();

    let mut header = vec!["Package", "Version", "Size"];
    if options.include_deps {
        header.push("With deps");
    }
    header.extend(["Files", "Depth", "Type", "Chain"]);
    if mark_editable {
        header.push("Editable");
    }
    builder.push_record(header.into_iter().map(String::from));

    for Row { package, with_deps } in &rows {
        let mut record = vec![
            package.distribution.name().to_string(),
            package.distribution.version().to_string(),
            format_size(package.size.bytes),
        ];
        if let Some(with_deps) = with_deps {
            record.push(format_size(with_deps.bytes));
        }
        record.extend([
            package.size.files.to_string(),
            package.node.depth.to_string(),
            kind(package).to_string(),
            package.node.chain(),
        ]);
        if mark_editable {
            let flag = if package.distribution.is_editable() {
                "yes"
            } else {
                ""
            };
            record.push(flag.to_string());
        }
        builder.push_record(record);
    }

    let numeric_end = if options.include_deps { 6 } else { 5 };
    let mut table = builder.build();
    table
        .with(Style::ascii())
        .with(Modify::new(Columns::new(2..numeric_end)).with(Alignment::right()))
        .with(Panel::footer(summary(result, rows.len())));

    writeln!(stdout, "{}", table)?;
    stdout.flush()?;
    Ok(())
}

enum TreeItem<'a> {
    Package(&'a PackageResult, Option<SizeTotals>),
    Module(&'a SubpackageNode),
}

struct TreeWriter<'a> {
    children: HashMap<&'a str, Vec<&'a Row<'a>>>,
}

impl<'a> TreeWriter<'a> {
    fn label(item: &TreeItem) -> String {
        match item {
            TreeItem::Package(package, with_deps) => {
                let mut label = format!(
                    "{} {} ({}, {} files",
                    package.distribution.name(),
                    package.distribution.version(),
                    format_size(package.size.bytes),
                    package.size.files
                );
                if let Some(with_deps) = with_deps {
                    label.push_str(&format!(", {} with deps", format_size(with_deps.bytes)));
                }
                label.push(')');
                if package.distribution.is_editable() {
                    label.push_str(" [editable]");
                }
                label
            }
            TreeItem::Module(node) => {
                let marker = if node.is_package { "/" } else { "" };
                format!(
                    "{}{} ({}, {} files)",
                    node.name,
                    marker,
                    format_size(node.cumulative.bytes),
                    node.cumulative.files
                )
            }
        }
    }

    fn items(&self, item: &TreeItem<'a>) -> Vec<TreeItem<'a>> {
        match item {
            TreeItem::Package(package, _) => {
                let package: &'a PackageResult = *package;
                let mut items: Vec<TreeItem> =
                    package.subpackages.iter().map(TreeItem::Module).collect();
                if let Some(rows) = self.children.get(package.name()) {
                    items.extend(
                        rows.iter()
                            .map(|row| TreeItem::Package(row.package, row.with_deps)),
                    );
                }
                items
            }
            TreeItem::Module(node) => {
                let node: &'a SubpackageNode = *node;
                node.children.iter().map(TreeItem::Module).collect()
            }
        }
    }

    fn write(
        &self,
        stdout: &mut impl Write,
        item: &TreeItem<'a>,
        prefix: &str,
    ) -> std::io::Result<()> {
        let children = self.items(item);
        for (i, child) in children.iter().enumerate() {
            let (edge, joint) = edge_and_joint(i == children.len() - 1);
            writeln!(stdout, "{}{}── {}", prefix, joint, Self::label(child))?;
            self.write(stdout, child, &format!("{}{}   ", prefix, edge))?;
        }
        Ok(())
    }
}

/// Print packages as a dependency tree. Each package hangs under its first parent; packages
/// whose first parent is not shown start their own tree. Subpackages are listed before
/// dependencies.
pub fn print_tree(
    result: &ScanResult,
    options: &ReportOptions,
    mut stdout: impl Write,
) -> Result<()> {
    let rows = rows(result, options);
    if rows.is_empty() {
        writeln!(stdout, "No packages found.")?;
        return Ok(());
    }

    let shown: BTreeSet<&str> = rows.iter().map(|row| row.package.name()).collect();
    let mut writer = TreeWriter {
        children: HashMap::new(),
    };
    let mut tops = Vec::new();
    for row in &rows {
        match row.package.node.parents.first() {
            Some(parent) if shown.contains(parent.as_str()) => writer
                .children
                .entry(parent.as_str())
                .or_default()
                .push(row),
            _ => tops.push(row),
        }
    }

    for row in tops {
        let item = TreeItem::Package(row.package, row.with_deps);
        writeln!(stdout, "{}", TreeWriter::label(&item))?;
        writer.write(&mut stdout, &item, "")?;
    }
    writeln!(stdout)?;
    writeln!(stdout, "{}", summary(result, rows.len()))?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{MarkerEnvironment, PythonEnvironment};
    use crate::graph::Roots;
    use crate::interrupt::Interrupt;
    use crate::report::SortKey;
    use crate::scan::tests::chain_environment;
    use crate::scan::{scan_environment, ScanOptions};

    fn scan(options: &ScanOptions) -> ScanResult {
        let site = chain_environment();
        let env = PythonEnvironment::new(vec![site.path().to_path_buf()], MarkerEnvironment::host());
        scan_environment(&env, options, &Interrupt::new()).unwrap()
    }

    fn render_table(result: &ScanResult, options: &ReportOptions) -> String {
        let mut out = Vec::new();
        print_table(result, options, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_table_columns_and_footer() {
        let result = scan(&ScanOptions::default());
        let out = render_table(&result, &ReportOptions::default());

        assert!(out.contains("Package"));
        assert!(out.contains("Chain"));
        assert!(out.contains("← a"));
        assert!(out.contains("← b"));
        assert!(out.contains("30.0 MiB"));
        assert!(out.contains("Total: 60.0 MiB in 10 files across 3 packages"));
        assert!(!out.contains("With deps"));
        // largest first
        let c = out.find("| c ").unwrap();
        let a = out.find("| a ").unwrap();
        assert!(c < a);
    }

    #[test]
    fn test_table_with_deps_and_top() {
        let result = scan(&ScanOptions::default());
        let options = ReportOptions {
            top: Some(1),
            include_deps: true,
            sort: SortKey::Name,
            ..ReportOptions::default()
        };
        let out = render_table(&result, &options);
        assert!(out.contains("With deps"));
        assert!(out.contains("60.0 MiB"));
        assert!(out.contains("Showing the top 1 packages"));
        assert!(!out.contains("| b "));
    }

    #[test]
    fn test_truncated_note() {
        let result = scan(&ScanOptions {
            max_depth: Some(1),
            ..ScanOptions::default()
        });
        let out = render_table(&result, &ReportOptions::default());
        assert!(out.contains("totals are partial"));
    }

    #[test]
    fn test_tree_nests_by_first_parent() {
        let result = scan(&ScanOptions {
            roots: Roots::TopLevel,
            module_depth: Some(1),
            ..ScanOptions::default()
        });
        let mut out = Vec::new();
        print_tree(&result, &ReportOptions::default(), &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert!(lines[0].starts_with("a 1.0 (10.0 MiB, 5 files)"));
        assert_eq!(lines[1], "├── a (10.0 MiB, 5 files)");
        assert!(lines[2].starts_with("└── b 1.0"));
        assert_eq!(lines[3], "    ├── b (20.0 MiB, 3 files)");
        assert!(lines[4].starts_with("    └── c 1.0"));
        assert_eq!(lines[5], "        └── c (30.0 MiB, 2 files)");
    }
}
