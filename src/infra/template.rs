//! Liquid template rendering.
//!
//! Names missing from the request data render as nil, at any depth, so a
//! data mapping that omits an optional field still produces a document.

use std::{collections::BTreeMap, fmt};

use liquid::{
    ObjectView, Parser, ParserBuilder, ValueView,
    model::{ArrayView, DisplayCow, KString, KStringCow, ScalarCow, State, Value},
};

use crate::application::ports::{TemplateData, TemplateError, TemplateRenderer};

pub struct LiquidTemplateRenderer {
    parser: Parser,
}

impl LiquidTemplateRenderer {
    pub fn new() -> Result<Self, TemplateError> {
        let parser = ParserBuilder::with_stdlib()
            .build()
            .map_err(|err| TemplateError::Parse {
                message: err.to_string(),
            })?;
        Ok(Self { parser })
    }
}

impl TemplateRenderer for LiquidTemplateRenderer {
    fn render(&self, template: &str, data: &TemplateData) -> Result<String, TemplateError> {
        let template = self
            .parser
            .parse(template)
            .map_err(|err| TemplateError::Parse {
                message: err.to_string(),
            })?;
        let globals = Node::globals(data)?;
        template
            .render(&globals)
            .map_err(|err| TemplateError::Render {
                message: err.to_string(),
            })
    }
}

static UNDEFINED: Node = Node::Undefined;
static NO_ENTRIES: BTreeMap<String, Node> = BTreeMap::new();

/// Request data as seen by templates.
#[derive(Debug)]
enum Node {
    /// Scalars and JSON `null`.
    Leaf(Value),
    List(Vec<Node>),
    /// `open` maps resolve every name; only the template root is open.
    Fields {
        entries: BTreeMap<String, Node>,
        open: bool,
    },
    Undefined,
}

impl Node {
    fn globals(data: &TemplateData) -> Result<Self, TemplateError> {
        Ok(Node::Fields {
            entries: Self::entries_of(data)?,
            open: true,
        })
    }

    fn from_json(value: &serde_json::Value) -> Result<Self, TemplateError> {
        Ok(match value {
            serde_json::Value::Array(items) => Node::List(
                items
                    .iter()
                    .map(Node::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            serde_json::Value::Object(map) => Node::Fields {
                entries: Self::entries_of(map)?,
                open: false,
            },
            scalar => Node::Leaf(liquid::model::to_value(scalar).map_err(|err| {
                TemplateError::Render {
                    message: err.to_string(),
                }
            })?),
        })
    }

    fn entries_of(
        map: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<BTreeMap<String, Node>, TemplateError> {
        map.iter()
            .map(|(key, value)| Ok((key.clone(), Node::from_json(value)?)))
            .collect()
    }

    fn entries(&self) -> &BTreeMap<String, Node> {
        match self {
            Node::Fields { entries, .. } => entries,
            _ => &NO_ENTRIES,
        }
    }

    fn items(&self) -> &[Node] {
        match self {
            Node::List(items) => items,
            _ => &[],
        }
    }

    fn item(&self, index: i64) -> Option<&Node> {
        let items = self.items();
        let index = if index < 0 {
            items.len() as i64 + index
        } else {
            index
        };
        usize::try_from(index).ok().and_then(|index| items.get(index))
    }
}

// `size` stays unresolved so lookups fall back to the container's own size.
fn undefined_member<'a>(index: &str) -> Option<&'a dyn ValueView> {
    if index == "size" {
        None
    } else {
        Some(&UNDEFINED as &dyn ValueView)
    }
}

impl ValueView for Node {
    fn as_debug(&self) -> &dyn fmt::Debug {
        self
    }

    fn render(&self) -> DisplayCow<'_> {
        match self {
            Node::Leaf(value) => value.render(),
            Node::Undefined => DisplayCow::Borrowed(&""),
            _ => DisplayCow::Owned(Box::new(self.to_value().render().to_string())),
        }
    }

    fn source(&self) -> DisplayCow<'_> {
        match self {
            Node::Leaf(value) => value.source(),
            Node::Undefined => DisplayCow::Borrowed(&"nil"),
            _ => DisplayCow::Owned(Box::new(self.to_value().source().to_string())),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Node::Leaf(value) => value.type_name(),
            Node::List(_) => "array",
            Node::Fields { .. } => "object",
            Node::Undefined => "nil",
        }
    }

    fn query_state(&self, state: State) -> bool {
        match self {
            Node::Leaf(value) => value.query_state(state),
            Node::Undefined => Value::Nil.query_state(state),
            _ => self.to_value().query_state(state),
        }
    }

    fn to_kstr(&self) -> KStringCow<'_> {
        match self {
            Node::Leaf(value) => value.to_kstr(),
            Node::Undefined => KStringCow::from_static(""),
            _ => KStringCow::from_string(self.render().to_string()),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Node::Leaf(value) => value.clone(),
            Node::List(items) => Value::Array(items.iter().map(|item| item.to_value()).collect()),
            Node::Fields { entries, .. } => Value::Object(
                entries
                    .iter()
                    .map(|(key, node)| (KString::from_ref(key), node.to_value()))
                    .collect(),
            ),
            Node::Undefined => Value::Nil,
        }
    }

    fn as_scalar(&self) -> Option<ScalarCow<'_>> {
        match self {
            Node::Leaf(value) => value.as_scalar(),
            _ => None,
        }
    }

    fn as_array(&self) -> Option<&dyn ArrayView> {
        match self {
            Node::List(_) => Some(self as &dyn ArrayView),
            _ => None,
        }
    }

    fn as_object(&self) -> Option<&dyn ObjectView> {
        match self {
            Node::Fields { .. } | Node::Undefined => Some(self as &dyn ObjectView),
            _ => None,
        }
    }

    fn as_state(&self) -> Option<State> {
        match self {
            Node::Leaf(value) => value.as_state(),
            _ => None,
        }
    }

    fn is_nil(&self) -> bool {
        match self {
            Node::Leaf(value) => value.is_nil(),
            Node::Undefined => true,
            _ => false,
        }
    }
}

impl ObjectView for Node {
    fn as_value(&self) -> &dyn ValueView {
        self
    }

    fn size(&self) -> i64 {
        self.entries().len() as i64
    }

    fn keys<'k>(&'k self) -> Box<dyn Iterator<Item = KStringCow<'k>> + 'k> {
        Box::new(
            self.entries()
                .keys()
                .map(|key| KStringCow::from_ref(key.as_str())),
        )
    }

    fn values<'k>(&'k self) -> Box<dyn Iterator<Item = &'k dyn ValueView> + 'k> {
        Box::new(self.entries().values().map(|node| node as &dyn ValueView))
    }

    fn iter<'k>(&'k self) -> Box<dyn Iterator<Item = (KStringCow<'k>, &'k dyn ValueView)> + 'k> {
        Box::new(
            self.entries()
                .iter()
                .map(|(key, node)| (KStringCow::from_ref(key.as_str()), node as &dyn ValueView)),
        )
    }

    fn contains_key(&self, index: &str) -> bool {
        match self {
            Node::Fields { entries, open } => *open || entries.contains_key(index),
            _ => false,
        }
    }

    fn get<'s>(&'s self, index: &str) -> Option<&'s dyn ValueView> {
        match self {
            Node::Fields { entries, .. } => match entries.get(index) {
                Some(node) => Some(node as &dyn ValueView),
                None => undefined_member(index),
            },
            Node::Undefined => undefined_member(index),
            _ => None,
        }
    }
}

impl ArrayView for Node {
    fn as_value(&self) -> &dyn ValueView {
        self
    }

    fn size(&self) -> i64 {
        self.items().len() as i64
    }

    fn values<'k>(&'k self) -> Box<dyn Iterator<Item = &'k dyn ValueView> + 'k> {
        Box::new(self.items().iter().map(|node| node as &dyn ValueView))
    }

    fn contains_key(&self, index: i64) -> bool {
        self.item(index).is_some()
    }

    fn get(&self, index: i64) -> Option<&dyn ValueView> {
        self.item(index).map(|node| node as &dyn ValueView)
    }
}
