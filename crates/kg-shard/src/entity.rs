//! Entity materialization (§4.9.5): fold a subject's current triples into a
//! typed, UI-shaped record with `type`, `properties`, and `edges`.

use std::collections::HashMap;

use kg_model::{merge_current, EntityId, Triple, TypedObject};

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub entity_type: String,
    pub properties: HashMap<String, TypedObject>,
    pub edges: HashMap<String, Vec<EntityId>>,
}

const TYPE_PREDICATES: [&str; 2] = ["$type", "type"];

/// Build an `Entity` from a subject's raw triples (already filtered to one
/// subject; may span buffer + multiple chunks). Applies the max-timestamp
/// shadowing rule before partitioning.
pub fn materialize(id: EntityId, triples: &[Triple]) -> Option<Entity> {
    if triples.is_empty() {
        return None;
    }
    let current = merge_current(triples.iter());

    let entity_type = current
        .iter()
        .find(|t| TYPE_PREDICATES.contains(&t.predicate.as_str()))
        .and_then(|t| match &t.object {
            TypedObject::String(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_else(|| heuristic_type(id.as_str()));

    let mut properties = HashMap::new();
    let mut edges: HashMap<String, Vec<EntityId>> = HashMap::new();

    for t in &current {
        if TYPE_PREDICATES.contains(&t.predicate.as_str()) {
            continue;
        }
        match &t.object {
            TypedObject::Ref(target) => {
                edges.entry(t.predicate.as_str().to_string()).or_default().push(target.clone());
            }
            TypedObject::RefArray(targets) => {
                edges.entry(t.predicate.as_str().to_string()).or_default().extend(targets.iter().cloned());
            }
            other => {
                properties.insert(t.predicate.as_str().to_string(), other.clone());
            }
        }
    }

    Some(Entity { id, entity_type, properties, edges })
}

/// Fallback type guess from URL shape, e.g. `https://imdb.com/title/tt123`
/// guesses `"title"` from the path's penultimate segment; bare origins fall
/// back to `"Entity"`.
fn heuristic_type(entity_id: &str) -> String {
    if let Ok(url) = url::Url::parse(entity_id) {
        if let Some(segments) = url.path_segments() {
            let segments: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();
            if segments.len() >= 2 {
                return segments[segments.len() - 2].to_string();
            }
        }
    }
    "Entity".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_model::TxId;

    fn triple(subject: &str, predicate: &str, object: TypedObject, ts: u64) -> Triple {
        Triple {
            subject: subject.parse().unwrap(),
            predicate: predicate.parse().unwrap(),
            object,
            timestamp: ts,
            tx_id: TxId::from_parts(ts, 0),
        }
    }

    #[test]
    fn partitions_properties_and_edges() {
        let id: EntityId = "https://imdb.com/title/tt1".parse().unwrap();
        let director: EntityId = "https://imdb.com/name/nm1".parse().unwrap();
        let triples = vec![
            triple(id.as_str(), "$type", TypedObject::String("Movie".into()), 1),
            triple(id.as_str(), "name", TypedObject::String("Inception".into()), 1),
            triple(id.as_str(), "director", TypedObject::Ref(director.clone()), 1),
        ];
        let entity = materialize(id, &triples).unwrap();
        assert_eq!(entity.entity_type, "Movie");
        assert_eq!(entity.properties["name"], TypedObject::String("Inception".into()));
        assert_eq!(entity.edges["director"], vec![director]);
    }

    #[test]
    fn falls_back_to_url_heuristic_then_entity() {
        let id: EntityId = "https://imdb.com/title/tt1".parse().unwrap();
        let triples = vec![triple(id.as_str(), "name", TypedObject::String("x".into()), 1)];
        assert_eq!(materialize(id, &triples).unwrap().entity_type, "title");

        let bare: EntityId = "https://imdb.com".parse().unwrap();
        let triples = vec![triple(bare.as_str(), "name", TypedObject::String("x".into()), 1)];
        assert_eq!(materialize(bare, &triples).unwrap().entity_type, "Entity");
    }

    #[test]
    fn shadows_older_timestamp_on_same_predicate() {
        let id: EntityId = "https://example.com/e/1".parse().unwrap();
        let triples = vec![
            triple(id.as_str(), "name", TypedObject::String("old".into()), 1),
            triple(id.as_str(), "name", TypedObject::String("new".into()), 2),
        ];
        let entity = materialize(id, &triples).unwrap();
        assert_eq!(entity.properties["name"], TypedObject::String("new".into()));
    }
}
