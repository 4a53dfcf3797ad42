use std::any::type_name;

use documented::{Documented, DocumentedFields};
use toml_edit::{ArrayOfTables, Decor, Item, RawString, Table};
use tracing::warn;

use crate::error::{ConfigError, Result};

/// Turns each line of `docs` into a `#` comment and appends it to the prefix of `decor`.
///
/// An existing prefix is kept; a separating `#` line is inserted when the existing prefix does
/// not already end in a blank line.
pub fn append_docs_as_toml_comments(decor: &mut Decor, docs: &str) {
    let comments: String = docs
        .lines()
        .map(|line| {
            if line.is_empty() {
                "#\n".to_string()
            } else {
                format!("# {line}\n")
            }
        })
        .collect();

    let prefix = match decor.prefix().and_then(RawString::as_str) {
        None | Some("") => comments,
        Some(existing) if existing.ends_with("\n\n") || existing.lines().last() == Some("") => {
            format!("{existing}{comments}")
        }
        Some(existing) => format!("{existing}#\n{comments}"),
    };
    decor.set_prefix(prefix);
}

/// Writes the field documentation of `T` as comments above each matching key of `table`.
///
/// The struct-level docs of `T` are added above the table header unless `is_root` is set.
pub fn annotate_toml_table<T>(table: &mut Table, is_root: bool) -> Result<()>
where
    T: Documented + DocumentedFields,
{
    if !is_root {
        append_docs_as_toml_comments(table.decor_mut(), T::DOCS);
    }

    for (mut key, item) in table.iter_mut() {
        let name = key.get().to_string();
        let Ok(docs) = T::get_field_docs(&name) else {
            warn!(
                "No documentation for key '{}' in '{}'",
                name,
                type_name::<T>()
            );
            continue;
        };

        match item {
            Item::None => return Err(ConfigError::UnexpectedTomlItem(name)),
            Item::Value(_) => append_docs_as_toml_comments(key.leaf_decor_mut(), docs),
            Item::Table(sub_table) => append_docs_as_toml_comments(sub_table.decor_mut(), docs),
            Item::ArrayOfTables(array) => {
                if let Some(first) = array.iter_mut().next() {
                    append_docs_as_toml_comments(first.decor_mut(), docs);
                }
            }
        }
    }

    Ok(())
}

/// Annotates the first table of `array` with the docs of `T`; the rest share its shape.
pub fn annotate_toml_array_of_tables<T>(array: &mut ArrayOfTables) -> Result<()>
where
    T: Documented + DocumentedFields,
{
    if let Some(first) = array.iter_mut().next() {
        annotate_toml_table::<T>(first, false)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use toml_edit::{Decor, DocumentMut};

    use super::*;
    use crate::{config::Config, repository::RepositoryConfig};

    fn prefix_of(decor: &Decor) -> String {
        decor
            .prefix()
            .and_then(|p| p.as_str())
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn test_append_docs_multiline_with_blank() {
        let mut decor = Decor::new("", "");
        append_docs_as_toml_comments(&mut decor, "Line 1\n\nLine 2");

        assert_eq!(prefix_of(&decor), "# Line 1\n#\n# Line 2\n");
    }

    #[test]
    fn test_append_docs_keeps_existing_prefix() {
        let mut decor = Decor::new("# existing\n", "");
        append_docs_as_toml_comments(&mut decor, "More");

        assert_eq!(prefix_of(&decor), "# existing\n#\n# More\n");
    }

    #[test]
    fn test_annotate_repositories_array() {
        let mut doc: DocumentMut = "[[repositories]]\nname = \"F-Droid\"\naddress = \"https://f-droid.org/repo\"\n"
            .parse()
            .unwrap();
        let array = doc["repositories"].as_array_of_tables_mut().unwrap();
        annotate_toml_array_of_tables::<RepositoryConfig>(array).unwrap();

        let rendered = doc.to_string();
        assert!(rendered.contains("# Display name of the repository."));
        assert!(rendered.contains("address = \"https://f-droid.org/repo\""));
    }

    #[test]
    fn test_annotated_default_config_has_comments() {
        let doc = Config::default_config().to_annotated_document().unwrap();
        let rendered = doc.to_string();

        assert!(rendered.contains("# Path to the SQLite database"));
        assert!(rendered.contains("[[repositories]]"));
    }
}
