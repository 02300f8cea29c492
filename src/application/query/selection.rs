//! Derives relation hints and key projection from a requested field set.

use crate::domain::Entity;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection {
    /// Declared relations named by the requested fields.
    pub relations: Vec<String>,
    /// Declared columns named by the requested fields.
    pub columns: Vec<String>,
}

impl FieldSelection {
    /// Fields may be plain names (`title`) or dotted paths into a relation
    /// (`author.name`). Names the entity does not declare are ignored.
    pub fn from_fields<E: Entity>(fields: &[String]) -> Self {
        let mut selection = Self::default();
        for field in fields {
            let head = field.split('.').next().unwrap_or(field).trim();
            if E::has_relation(head) {
                push_unique(&mut selection.relations, head);
            } else if E::has_column(head) {
                push_unique(&mut selection.columns, head);
            }
        }
        selection
    }

    pub fn has_relations(&self) -> bool {
        !self.relations.is_empty()
    }

    /// Column projection for the store, always including the primary key.
    pub fn select<E: Entity>(&self) -> Option<Vec<String>> {
        if self.columns.is_empty() {
            return None;
        }
        let mut select = vec![E::KEY_COLUMN.to_string()];
        for column in &self.columns {
            push_unique(&mut select, column);
        }
        Some(select)
    }
}

fn push_unique(target: &mut Vec<String>, value: &str) {
    if !target.iter().any(|existing| existing == value) {
        target.push(value.to_string());
    }
}
