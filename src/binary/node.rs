/// An attribute value. Text values may be dictionary coded on the wire, bytes never are.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl AttrValue {
    /// Returns the value as text, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(text) => Some(text),
            AttrValue::Bytes(_) => None,
        }
    }

    /// Returns the raw bytes of either variant.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AttrValue::Text(text) => text.as_bytes(),
            AttrValue::Bytes(bytes) => bytes,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<Vec<u8>> for AttrValue {
    fn from(value: Vec<u8>) -> Self {
        AttrValue::Bytes(value)
    }
}

/// Attributes in insertion order with unique keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, AttrValue)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`. An existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((key, value)),
        }
    }

    /// Appends a pair only if the key is new. Returns `false` on a duplicate.
    pub(crate) fn push_unique(&mut self, key: String, value: AttrValue) -> bool {
        if self.contains_key(&key) {
            return false;
        }
        self.0.push((key, value));
        true
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }
}

/// Body of a node. The variant decides how the codec lays out the content section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Content {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Child(Box<Node>),
    Children(Vec<Node>),
}

/// A protocol message unit: a tag, ordered attributes and typed content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    tag: String,
    attributes: Attributes,
    content: Content,
}

impl Node {
    /// Creates a node with no attributes and empty content.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Attributes::new(),
            content: Content::Empty,
        }
    }

    pub(crate) fn from_parts(tag: String, attributes: Attributes, content: Content) -> Self {
        Self {
            tag,
            attributes,
            content,
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key, value);
        self
    }

    pub fn with_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.content = Content::Bytes(bytes.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.content = Content::Child(Box::new(child));
        self
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.content = Content::Children(children);
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    /// Returns a text attribute.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(AttrValue::as_str)
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Returns the binary payload, if the content is bytes.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Content::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Iterates direct children regardless of whether content is a single child or a list.
    pub fn children(&self) -> impl Iterator<Item = &Node> {
        let slice: &[Node] = match &self.content {
            Content::Child(child) => std::slice::from_ref(child.as_ref()),
            Content::Children(children) => children,
            Content::Empty | Content::Bytes(_) => &[],
        };
        slice.iter()
    }

    /// Finds the first direct child with the given tag.
    pub fn child(&self, tag: &str) -> Option<&Node> {
        self.children().find(|child| child.tag == tag)
    }
}
