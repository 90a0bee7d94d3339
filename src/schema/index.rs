use crate::document::types::IndexSpec;

/// Declared index: ordered keys, uniqueness, and the attributes a secondary shard on the
/// leading key should carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub keys: Vec<String>,
    pub unique: bool,
    pub projection: Vec<String>,
}

impl Index {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            unique: false,
            projection: Vec::new(),
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn projection<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = attrs.into_iter().map(Into::into).collect();
        self
    }

    pub fn leading_key(&self) -> Option<&str> {
        self.keys.first().map(String::as_str)
    }

    pub fn spec(&self) -> IndexSpec {
        IndexSpec::new(self.keys.clone(), self.unique)
    }
}
