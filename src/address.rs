//! Protocol address parsing
//!
//! Controller addresses look like
//! `ns=3;s="StepData"."RunningSteps"."Steps"[1]."Speed"`: a namespace index
//! followed by a hierarchical string identifier. Each path segment may carry
//! an array index. Index `0` is the template element of an array and never
//! holds live data.
//!
//! Addresses are parsed once at the boundary into [`TagAddress`] (namespace
//! plus path) or [`TagPath`] (the namespace-relative part, which is what the
//! store persists as a tag name).

use crate::error::{RecipeSyncError, Result};
use std::str::FromStr;

/// Array index reserved for the template element
pub const PLACEHOLDER_INDEX: u32 = 0;

/// One segment of a tag path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    name: String,
    quoted: bool,
    index: Option<u32>,
}

impl PathSegment {
    /// A quoted segment without index
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quoted: true,
            index: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }

    /// Same segment with the given array index
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.quoted {
            write!(f, "\"{}\"", self.name)?;
        } else {
            write!(f, "{}", self.name)?;
        }
        if let Some(index) = self.index {
            write!(f, "[{}]", index)?;
        }
        Ok(())
    }
}

/// Namespace-relative hierarchical path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagPath {
    segments: Vec<PathSegment>,
}

impl TagPath {
    /// Build a path from quoted segment names
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: names.into_iter().map(PathSegment::new).collect(),
        }
    }

    /// Parse a path such as `"A"."B"[2]."C"`
    pub fn parse(input: &str) -> Result<Self> {
        let err = |msg: &str| RecipeSyncError::Address(format!("{} in path '{}'", msg, input));
        let chars: Vec<char> = input.trim().chars().collect();
        let mut segments = Vec::new();
        let mut pos = 0;

        if chars.is_empty() {
            return Err(err("empty path"));
        }

        loop {
            let (name, quoted) = if chars.get(pos) == Some(&'"') {
                let start = pos + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&c| c == '"')
                    .map(|offset| start + offset)
                    .ok_or_else(|| err("unterminated quote"))?;
                pos = end + 1;
                (chars[start..end].iter().collect::<String>(), true)
            } else {
                let start = pos;
                while pos < chars.len() && chars[pos] != '.' && chars[pos] != '[' {
                    pos += 1;
                }
                (chars[start..pos].iter().collect::<String>(), false)
            };

            if name.is_empty() {
                return Err(err("empty segment"));
            }

            let mut index = None;
            if chars.get(pos) == Some(&'[') {
                let start = pos + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&c| c == ']')
                    .map(|offset| start + offset)
                    .ok_or_else(|| err("unterminated index"))?;
                let digits: String = chars[start..end].iter().collect();
                index = Some(
                    digits
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| err("invalid array index"))?,
                );
                pos = end + 1;
            }

            segments.push(PathSegment {
                name,
                quoted,
                index,
            });

            match chars.get(pos) {
                None => break,
                Some('.') => {
                    pos += 1;
                    if pos >= chars.len() {
                        return Err(err("trailing separator"));
                    }
                }
                Some(c) => return Err(err(&format!("unexpected character '{}'", c))),
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Index of the innermost indexed segment
    ///
    /// For `"Steps"[3]."Speed"` this is `3`; tag names of step fields sort
    /// numerically by this value.
    pub fn array_index(&self) -> Option<u32> {
        self.segments.iter().rev().find_map(|s| s.index)
    }

    /// Whether any segment addresses the template element `[0]`
    pub fn contains_placeholder(&self) -> bool {
        self.segments
            .iter()
            .any(|s| s.index == Some(PLACEHOLDER_INDEX))
    }

    /// Same path with the last segment indexed
    pub fn element(&self, index: u32) -> Self {
        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            last.index = Some(index);
        }
        Self { segments }
    }

    /// Path of a named child
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::new(name));
        Self { segments }
    }

    /// Parent node path
    ///
    /// The parent of an array element `"A"[2]` is the array `"A"`; the parent
    /// of `"A"."B"` is `"A"`. A single unindexed segment has no parent.
    pub fn parent(&self) -> Option<Self> {
        let last = self.segments.last()?;
        let mut segments = self.segments.clone();
        if last.index.is_some() {
            if let Some(last) = segments.last_mut() {
                last.index = None;
            }
        } else {
            segments.pop();
        }
        if segments.is_empty() {
            None
        } else {
            Some(Self { segments })
        }
    }

    /// Whether two paths name the same node, ignoring quoting style
    pub fn same_node(&self, other: &TagPath) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.name == b.name && a.index == b.index)
    }

    /// Whether `prefix` is a leading part of this path (indices ignored)
    pub fn starts_with(&self, prefix: &TagPath) -> bool {
        prefix.segments.len() <= self.segments.len()
            && prefix
                .segments
                .iter()
                .zip(&self.segments)
                .all(|(a, b)| a.name == b.name)
    }

    /// Display name of the last segment
    pub fn leaf_name(&self) -> &str {
        self.segments.last().map(|s| s.name.as_str()).unwrap_or("")
    }
}

impl std::fmt::Display for TagPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for TagPath {
    type Err = RecipeSyncError;

    fn from_str(s: &str) -> Result<Self> {
        TagPath::parse(s)
    }
}

/// A namespace-qualified controller address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagAddress {
    namespace: u16,
    path: TagPath,
}

impl TagAddress {
    pub fn new(namespace: u16, path: TagPath) -> Self {
        Self { namespace, path }
    }

    /// Parse `ns=<n>;s=<path>`; a missing `ns=` means namespace 0
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let (namespace, rest) = match trimmed.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, rest) = rest.split_once(';').ok_or_else(|| {
                    RecipeSyncError::Address(format!("missing ';' after namespace in '{}'", input))
                })?;
                let ns = ns.trim().parse::<u16>().map_err(|_| {
                    RecipeSyncError::Address(format!("invalid namespace index in '{}'", input))
                })?;
                (ns, rest)
            }
            None => (0, trimmed),
        };

        let path = rest.strip_prefix("s=").ok_or_else(|| {
            RecipeSyncError::Address(format!("expected string identifier 's=' in '{}'", input))
        })?;

        Ok(Self {
            namespace,
            path: TagPath::parse(path)?,
        })
    }

    pub fn namespace(&self) -> u16 {
        self.namespace
    }

    pub fn path(&self) -> &TagPath {
        &self.path
    }

    /// The namespace-relative identifier, as persisted in the store
    pub fn identifier(&self) -> String {
        self.path.to_string()
    }

    /// Same path in another namespace
    pub fn in_namespace(&self, namespace: u16) -> Self {
        Self {
            namespace,
            path: self.path.clone(),
        }
    }

    pub fn child(&self, name: impl Into<String>) -> Self {
        Self {
            namespace: self.namespace,
            path: self.path.child(name),
        }
    }

    pub fn element(&self, index: u32) -> Self {
        Self {
            namespace: self.namespace,
            path: self.path.element(index),
        }
    }

    pub fn contains_placeholder(&self) -> bool {
        self.path.contains_placeholder()
    }
}

impl std::fmt::Display for TagAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ns={};s={}", self.namespace, self.path)
    }
}

impl FromStr for TagAddress {
    type Err = RecipeSyncError;

    fn from_str(s: &str) -> Result<Self> {
        TagAddress::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_address() {
        let addr = TagAddress::parse(r#"ns=3;s="StepData"."RunningSteps"."Steps""#).unwrap();
        assert_eq!(addr.namespace(), 3);
        assert_eq!(addr.path().segments().len(), 3);
        assert_eq!(addr.path().leaf_name(), "Steps");
        assert_eq!(addr.identifier(), r#""StepData"."RunningSteps"."Steps""#);
    }

    #[test]
    fn test_parse_indexed_segment() {
        let path = TagPath::parse(r#""StepData"."RunningSteps"."Steps"[12]."Speed""#).unwrap();
        assert_eq!(path.array_index(), Some(12));
        assert!(!path.contains_placeholder());
        assert_eq!(path.segments()[2].index(), Some(12));
        assert_eq!(path.segments()[3].index(), None);
    }

    #[test]
    fn test_placeholder_detection() {
        let path = TagPath::parse(r#""A"."Steps"[0]"#).unwrap();
        assert!(path.contains_placeholder());
        let child = path.child("Speed");
        assert!(child.contains_placeholder());
    }

    #[test]
    fn test_unquoted_segments_roundtrip() {
        let path = TagPath::parse("Line.Oven[2].Temp").unwrap();
        assert_eq!(path.to_string(), "Line.Oven[2].Temp");
        assert_eq!(path.array_index(), Some(2));
    }

    #[test]
    fn test_requalify_namespace() {
        let path = TagPath::parse(r#""X"."Y""#).unwrap();
        let addr = TagAddress::new(3, path).in_namespace(5);
        assert_eq!(addr.to_string(), r#"ns=5;s="X"."Y""#);
    }

    #[test]
    fn test_missing_namespace_defaults_to_zero() {
        let addr = TagAddress::parse(r#"s="X""#).unwrap();
        assert_eq!(addr.namespace(), 0);
    }

    #[test]
    fn test_element_and_child() {
        let root = TagAddress::parse(r#"ns=3;s="S"."Steps""#).unwrap();
        let field = root.element(4).child("Speed");
        assert_eq!(field.to_string(), r#"ns=3;s="S"."Steps"[4]."Speed""#);
        assert!(field.path().starts_with(root.path()));
    }

    #[test]
    fn test_parent_of_element_is_array() {
        let field = TagPath::parse(r#""S"."Steps"[2]."Speed""#).unwrap();
        let element = field.parent().unwrap();
        assert_eq!(element.to_string(), r#""S"."Steps"[2]"#);
        let array = element.parent().unwrap();
        assert_eq!(array.to_string(), r#""S"."Steps""#);
        assert_eq!(array.parent().unwrap().to_string(), r#""S""#);
        assert!(TagPath::parse(r#""S""#).unwrap().parent().is_none());
    }

    #[test]
    fn test_same_node_ignores_quoting() {
        let quoted = TagPath::parse(r#""Line"."Oven"[2]"#).unwrap();
        let bare = TagPath::parse("Line.Oven[2]").unwrap();
        assert_ne!(quoted, bare);
        assert!(quoted.same_node(&bare));
        assert!(!quoted.same_node(&bare.element(3)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(TagPath::parse("").is_err());
        assert!(TagPath::parse(r#""A"."#).is_err());
        assert!(TagPath::parse(r#""A"[x]"#).is_err());
        assert!(TagPath::parse(r#""A"#).is_err());
        assert!(TagPath::parse(r#""A"x"#).is_err());
        assert!(TagAddress::parse("ns=abc;s=A").is_err());
        assert!(TagAddress::parse("ns=3;i=85").is_err());
    }

    use proptest::prelude::*;

    fn segment_strategy() -> impl Strategy<Value = (String, bool, Option<u32>)> {
        ("[A-Za-z_][A-Za-z0-9_ ]{0,12}", any::<bool>(), proptest::option::of(0u32..500))
    }

    proptest! {
        #[test]
        fn test_display_parse_roundtrip(
            segments in prop::collection::vec(segment_strategy(), 1..6),
            namespace in 0u16..10,
        ) {
            let path = TagPath {
                segments: segments
                    .into_iter()
                    .map(|(name, quoted, index)| {
                        // Unquoted names cannot carry spaces
                        let quoted = quoted || name.contains(' ');
                        PathSegment { name, quoted, index }
                    })
                    .collect(),
            };
            let addr = TagAddress::new(namespace, path);
            let reparsed = TagAddress::parse(&addr.to_string()).unwrap();
            prop_assert_eq!(reparsed, addr);
        }
    }
}
