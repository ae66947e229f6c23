use serde::Deserialize;

/// Optional client-side filter over object names.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NameFilter {
    Contains { value: String },
}

/// Case-insensitive application of an optional name filter.
pub fn apply_name_filter(names: Vec<String>, filter: Option<&NameFilter>) -> Vec<String> {
    let Some(NameFilter::Contains { value }) = filter else {
        return names;
    };

    let needle = value.to_lowercase();
    names
        .into_iter()
        .filter(|name| name.to_lowercase().contains(&needle))
        .collect()
}
