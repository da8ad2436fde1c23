//! Remote attribute-set catalog, resolved once per export pass.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::store::api;
use crate::store::model::{AttributeOption, RemoteAttribute};
use crate::store::{StoreError, StoreService};

/// Comparison key for attribute labels and option values: whitespace removed,
/// upper-cased.
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace().collect::<String>().to_uppercase()
}

/// One attribute set with its attributes keyed by normalized frontend label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSet {
    pub id: i64,
    attributes: HashMap<String, RemoteAttribute>,
}

impl ResolvedSet {
    pub fn new(id: i64, attributes: Vec<RemoteAttribute>) -> Self {
        let attributes = attributes
            .into_iter()
            .map(|attr| {
                let label = attr
                    .default_frontend_label
                    .clone()
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or_else(|| attr.attribute_code.clone());
                (normalize(&label), attr)
            })
            .collect();
        Self { id, attributes }
    }

    pub fn attribute(&self, label: &str) -> Option<&RemoteAttribute> {
        self.attributes.get(&normalize(label))
    }

    /// Normalized label of the attribute with the given remote id.
    pub fn label_of(&self, attribute_id: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(_, attr)| attr.attribute_id.to_string() == attribute_id)
            .map(|(label, _)| label.as_str())
    }

    /// Remote option id of `value` on the attribute labelled `label`.
    pub fn option_value(&self, label: &str, value: &str) -> Option<&str> {
        let key = normalize(value);
        self.attribute(label)?
            .options
            .iter()
            .find(|o| !o.value.is_empty() && normalize(&o.label) == key)
            .map(|o| o.value.as_str())
    }

    fn remember_option(&mut self, attribute_id: i64, label: &str, value: &str) {
        for attr in self.attributes.values_mut() {
            if attr.attribute_id == attribute_id {
                attr.options.push(AttributeOption {
                    label: label.to_string(),
                    value: value.to_string(),
                });
            }
        }
    }
}

/// Attribute sets by normalized name. A name that could not be resolved is
/// simply absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeCatalog {
    sets: HashMap<String, ResolvedSet>,
}

impl AttributeCatalog {
    /// One request for the set list plus one per distinct requested name.
    /// Failures leave the affected names unresolved.
    pub async fn load<'a>(
        store: &dyn StoreService,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let wanted: HashSet<String> = names
            .into_iter()
            .map(normalize)
            .filter(|n| !n.is_empty())
            .collect();
        let mut catalog = Self::default();
        if wanted.is_empty() {
            return catalog;
        }

        let remote_sets = match api::attribute_sets(store).await {
            Ok(sets) => sets,
            Err(e) => {
                warn!(error = %e, "failed to list attribute sets");
                return catalog;
            }
        };
        for set in remote_sets {
            let key = normalize(&set.attribute_set_name);
            if !wanted.contains(&key) || catalog.sets.contains_key(&key) {
                continue;
            }
            match api::attribute_set_attributes(store, set.attribute_set_id).await {
                Ok(attributes) => {
                    debug!(set = %set.attribute_set_name, attributes = attributes.len(), "attribute set resolved");
                    catalog
                        .sets
                        .insert(key, ResolvedSet::new(set.attribute_set_id, attributes));
                }
                Err(e) => warn!(set = %set.attribute_set_name, error = %e, "failed to load attribute set"),
            }
        }
        catalog
    }

    pub fn insert(&mut self, name: &str, set: ResolvedSet) {
        self.sets.insert(normalize(name), set);
    }

    pub fn set(&self, name: &str) -> Option<&ResolvedSet> {
        self.sets.get(&normalize(name))
    }

    /// Option id for `value`, creating the option remotely when the attribute
    /// exists but doesn't know the value yet. `Ok(None)` when the set or the
    /// attribute is unknown.
    pub async fn ensure_option(
        &mut self,
        store: &dyn StoreService,
        set_name: &str,
        label: &str,
        value: &str,
    ) -> Result<Option<String>, StoreError> {
        let Some(set) = self.set(set_name) else {
            return Ok(None);
        };
        if let Some(existing) = set.option_value(label, value) {
            return Ok(Some(existing.to_string()));
        }
        let Some(attr) = set.attribute(label) else {
            return Ok(None);
        };
        let (attribute_id, code) = (attr.attribute_id, attr.attribute_code.clone());

        let created = api::create_attribute_option(store, &code, value).await?;
        debug!(attribute = %code, value, option = %created, "attribute option created");
        for set in self.sets.values_mut() {
            set.remember_option(attribute_id, value, &created);
        }
        Ok(Some(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color() -> RemoteAttribute {
        RemoteAttribute {
            attribute_id: 93,
            attribute_code: "color".into(),
            default_frontend_label: Some("Color ".into()),
            scope: Some("global".into()),
            is_user_defined: true,
            options: vec![
                AttributeOption {
                    label: " ".into(),
                    value: "".into(),
                },
                AttributeOption {
                    label: "Dark Red".into(),
                    value: "5".into(),
                },
            ],
        }
    }

    #[test]
    fn normalize_strips_whitespace_and_uppercases() {
        assert_eq!(normalize(" Dark red "), "DARKRED");
        assert_eq!(normalize("x l"), "XL");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn set_lookups_use_normalized_labels() {
        let set = ResolvedSet::new(4, vec![color()]);
        assert_eq!(set.attribute("color").map(|a| a.attribute_id), Some(93));
        assert_eq!(set.option_value("COLOR", "darkred"), Some("5"));
        assert_eq!(set.option_value("Color", " "), None);
        assert_eq!(set.label_of("93"), Some("COLOR"));
        assert_eq!(set.label_of("94"), None);
    }

    #[test]
    fn catalog_is_keyed_by_normalized_name() {
        let mut catalog = AttributeCatalog::default();
        catalog.insert("Chairs Set", ResolvedSet::new(11, vec![color()]));
        assert_eq!(catalog.set("chairsset").map(|s| s.id), Some(11));
        assert!(catalog.set("Tables").is_none());
    }
}
