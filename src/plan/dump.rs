//! mysqldump command assembly.
//!
//! Commands keep the `{credentials_file}` and `{database}` placeholders;
//! `run_with_credentials` fills them in.

use super::SnapshotPlan;

impl SnapshotPlan {
    /// Shell commands writing this plan's dump to `target`. Data and
    /// structure come from the first command; schema-only tables, when
    /// listed, are appended by a second `--no-data` run. A table list made up
    /// only of schema-only tables has no data pass at all.
    pub fn dump_commands(&self, mysqldump: &str, options: &str, target: &str) -> Vec<String> {
        let prefix = format!("{} --defaults-extra-file={{credentials_file}}", mysqldump);

        let ignore_option = if !self.ignore_tables.is_empty() && self.tables.is_empty() {
            ignore_table_options(&self.ignore_tables)
        } else {
            String::new()
        };
        let schema_only_ignore = if self.tables.is_empty() {
            ignore_table_options(&self.schema_only_tables)
        } else {
            String::new()
        };
        let data_tables = self
            .tables
            .iter()
            .filter(|t| !self.schema_only_tables.contains(t))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");

        let mut commands = Vec::new();
        if self.tables.is_empty() || !data_tables.is_empty() {
            commands.push(format!(
                "{} {} > {}",
                prefix,
                join_non_empty(&[options, &ignore_option, &schema_only_ignore, "{database}", &data_tables]),
                target
            ));
        }

        if !self.schema_only_tables.is_empty() {
            let redirect = if commands.is_empty() { ">" } else { ">>" };
            commands.push(format!(
                "{} {} {} {}",
                prefix,
                join_non_empty(&[
                    options,
                    &ignore_option,
                    "--no-data {database}",
                    &self.schema_only_tables.join(" "),
                ]),
                redirect,
                target
            ));
        }

        commands
    }
}

fn ignore_table_options(tables: &[String]) -> String {
    tables
        .iter()
        .map(|t| format!("--ignore-table={{database}}.{}", t))
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_non_empty(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
