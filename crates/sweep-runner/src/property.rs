use crate::error::ConfigError;
use crate::fields::Configurable;
use crate::value::{FieldValue, ValueKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a property path: the component type the field is read from
/// and the field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyNode {
    pub owner: String,
    pub field: String,
}

impl PropertyNode {
    pub fn new(owner: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for PropertyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.field)
    }
}

/// Route from the producer down to the swept leaf field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyPath {
    nodes: Vec<PropertyNode>,
}

impl PropertyPath {
    pub fn new(nodes: Vec<PropertyNode>) -> Self {
        Self { nodes }
    }

    /// Parses `Owner::field/Owner::field/...`. A node without an owner
    /// prefix is rejected, since the owner is checked during traversal.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut nodes = Vec::new();
        for part in text.split('/').filter(|p| !p.trim().is_empty()) {
            let (owner, field) =
                part.trim()
                    .split_once("::")
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "property_path".to_string(),
                        message: format!("expected Owner::field, got '{}'", part),
                    })?;
            nodes.push(PropertyNode::new(owner, field));
        }
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[PropertyNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaf(&self) -> Option<&PropertyNode> {
        self.nodes.last()
    }

    /// Walks the path without modifying anything and returns the kind of the
    /// leaf field.
    pub fn resolve<C: Configurable + ?Sized>(&self, root: &C) -> Result<ValueKind, ConfigError> {
        let (leaf, parents) = self
            .nodes
            .split_last()
            .ok_or(ConfigError::MissingPropertyPath)?;
        let leaf_index = parents.len();
        match parents.split_first() {
            None => {
                check_owner(0, leaf, root.type_name())?;
                root.value_kind(&leaf.field)
            }
            Some((first, rest)) => {
                check_owner(0, first, root.type_name())?;
                let mut current = root.nested(&first.field)?;
                for (offset, node) in rest.iter().enumerate() {
                    check_owner(offset + 1, node, current.type_name())?;
                    current = current.nested(&node.field)?;
                }
                check_owner(leaf_index, leaf, current.type_name())?;
                current.value_kind(&leaf.field)
            }
        }
    }

    /// Checks that every value can be assigned to the leaf field.
    pub fn validate<C: Configurable + ?Sized>(
        &self,
        root: &C,
        values: &[FieldValue],
    ) -> Result<(), ConfigError> {
        let expected = self.resolve(root)?;
        let leaf = self.leaf().ok_or(ConfigError::MissingPropertyPath)?;
        for value in values {
            if !expected.accepts(value.kind()) {
                return Err(ConfigError::TypeMismatch {
                    component: leaf.owner.clone(),
                    field: leaf.field.clone(),
                    expected,
                    found: value.kind(),
                });
            }
        }
        Ok(())
    }

    /// Walks the path through nested components and writes `value` to the leaf.
    pub fn apply<C: Configurable + ?Sized>(
        &self,
        root: &mut C,
        value: FieldValue,
    ) -> Result<(), ConfigError> {
        let (leaf, parents) = self
            .nodes
            .split_last()
            .ok_or(ConfigError::MissingPropertyPath)?;
        let leaf_index = parents.len();
        match parents.split_first() {
            None => {
                check_owner(0, leaf, root.type_name())?;
                root.set_value(&leaf.field, value)
            }
            Some((first, rest)) => {
                check_owner(0, first, root.type_name())?;
                let mut current = root.nested_mut(&first.field)?;
                for (offset, node) in rest.iter().enumerate() {
                    check_owner(offset + 1, node, current.type_name())?;
                    current = current.nested_mut(&node.field)?;
                }
                check_owner(leaf_index, leaf, current.type_name())?;
                current.set_value(&leaf.field, value)
            }
        }
    }
}

fn check_owner(index: usize, node: &PropertyNode, found: &str) -> Result<(), ConfigError> {
    if node.owner == found {
        Ok(())
    } else {
        Err(ConfigError::OwnerMismatch {
            index,
            expected: node.owner.clone(),
            found: found.to_string(),
        })
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.nodes.iter().map(|n| n.to_string()).collect();
        f.write_str(&parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeProducer, FAKE_LEARNER, FAKE_PRODUCER};

    fn depth_path() -> PropertyPath {
        PropertyPath::new(vec![
            PropertyNode::new(FAKE_PRODUCER, "learner"),
            PropertyNode::new(FAKE_LEARNER, "depth"),
        ])
    }

    #[test]
    fn parse_round_trips_through_display() {
        let path = PropertyPath::parse("FakeProducer::learner/FakeLearner::depth").expect("parse");
        assert_eq!(path, depth_path());
        assert_eq!(path.to_string(), "FakeProducer::learner/FakeLearner::depth");
        assert!(PropertyPath::parse("learner/depth").is_err());
    }

    #[test]
    fn apply_writes_nested_leaf() {
        let mut producer = FakeProducer::default();
        depth_path()
            .apply(&mut producer, FieldValue::Int(7))
            .expect("apply");
        assert_eq!(producer.learner.depth, 7);
    }

    #[test]
    fn apply_writes_root_leaf() {
        let mut producer = FakeProducer::default();
        let path = PropertyPath::new(vec![PropertyNode::new(FAKE_PRODUCER, "label")]);
        path.apply(&mut producer, FieldValue::from("tuned"))
            .expect("apply");
        assert_eq!(producer.label, "tuned");
    }

    #[test]
    fn resolve_reports_leaf_kind_and_validate_checks_every_value() {
        let producer = FakeProducer::default();
        assert_eq!(depth_path().resolve(&producer).expect("resolve"), ValueKind::Int);
        depth_path()
            .validate(&producer, &[FieldValue::Int(1), FieldValue::Int(2)])
            .expect("valid");
        let err = depth_path()
            .validate(&producer, &[FieldValue::Int(1), FieldValue::from("deep")])
            .expect_err("text into int");
        assert!(matches!(err, ConfigError::TypeMismatch { .. }), "{}", err);
    }

    #[test]
    fn traversal_fails_fast_on_bad_paths() {
        let mut producer = FakeProducer::default();

        let unknown = PropertyPath::new(vec![
            PropertyNode::new(FAKE_PRODUCER, "learner"),
            PropertyNode::new(FAKE_LEARNER, "width"),
        ]);
        assert!(matches!(
            unknown.apply(&mut producer, FieldValue::Int(1)),
            Err(ConfigError::UnknownField { .. })
        ));

        let wrong_owner = PropertyPath::new(vec![
            PropertyNode::new(FAKE_PRODUCER, "learner"),
            PropertyNode::new("Svm", "depth"),
        ]);
        assert_eq!(
            wrong_owner.resolve(&producer),
            Err(ConfigError::OwnerMismatch {
                index: 1,
                expected: "Svm".to_string(),
                found: FAKE_LEARNER.to_string(),
            })
        );

        let through_value = PropertyPath::new(vec![
            PropertyNode::new(FAKE_PRODUCER, "label"),
            PropertyNode::new(FAKE_LEARNER, "depth"),
        ]);
        assert!(matches!(
            through_value.resolve(&producer),
            Err(ConfigError::NotNested { .. })
        ));

        assert_eq!(
            PropertyPath::default().apply(&mut producer, FieldValue::Int(1)),
            Err(ConfigError::MissingPropertyPath)
        );
        assert_eq!(producer.learner.depth, 1);
    }
}
