use crate::prelude::*;

/// A term identifier. The contained ID string is required to be unique
/// throughout the whole project.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Tid {
    id: String,
}

impl Tid {
    /// Generate a new term identifier with the given ID string.
    pub fn new<T: ToString>(val: T) -> Tid {
        Tid { id: val.to_string() }
    }

    /// Add a suffix to the ID string and return the new `Tid`.
    pub fn with_id_suffix(self, suffix: &str) -> Self {
        Tid {
            id: self.id + suffix,
        }
    }
}

impl std::fmt::Display for Tid {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "{}", self.id)
    }
}

/// A source-level location, corresponding to one entry of a debug scope chain.
///
/// `inlined_at` points at the location the surrounding code was inlined into,
/// so following the chain yields the stack of inlining decisions,
/// innermost location first.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct SourceLocation {
    /// Path of the source file.
    pub file: String,
    /// Line number, 1-based.
    pub line: u32,
    /// Column number, 1-based.
    pub column: u32,
    /// The location this code was inlined into, if any.
    pub inlined_at: Option<Box<SourceLocation>>,
}

impl SourceLocation {
    /// Flatten the scope chain into `path:line:column` strings, innermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut entries = Vec::new();
        let mut current = Some(self);
        while let Some(loc) = current {
            entries.push(format!("{}:{}:{}", loc.file, loc.line, loc.column));
            current = loc.inlined_at.as_deref();
        }
        entries
    }
}

/// A term is an object inside an IR module with a unique ID (contained in the `tid`)
/// and an optional source location.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Term<T> {
    /// The term identifier.
    pub tid: Tid,
    /// The object.
    pub term: T,
    /// The source location the term was generated from, if known.
    #[serde(default = "no_location", skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
}

fn no_location() -> Option<SourceLocation> {
    None
}

impl<T> Term<T> {
    /// Wrap an object into a term without source location.
    pub fn new(tid: Tid, term: T) -> Term<T> {
        Term {
            tid,
            term,
            loc: None,
        }
    }
}

/// Metadata keys attached to instructions by the annotator and the analyses.
pub mod metadata_keys {
    /// Slot identifier on loads, stores and synthetic parameter calls.
    pub const ID: &str = "id";
    /// Source descriptor at a taint source site.
    pub const TAINT_SRC: &str = "taint_src";
    /// Comma-joined descriptor list, materialized at taint finalization.
    pub const TAINT: &str = "taint";
    /// Allocator name, at allocation-size-defining instructions.
    pub const SINK: &str = "sink";
    /// Pairs of bitvector constants representing an interval union.
    pub const INTRANGE: &str = "intrange";
}

/// A metadata value attached to an instruction under a string key.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum MetadataValue {
    /// A plain string, used by the `id`, `taint_src`, `taint` and `sink` keys.
    Str(String),
    /// A list of `[lo, hi)` bitvector pairs, used by the `intrange` key.
    Ranges(Vec<(super::Bitvector, super::Bitvector)>),
}

impl MetadataValue {
    /// Return the contained string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            MetadataValue::Ranges(_) => None,
        }
    }

    /// Return the contained interval pairs, if this is a range value.
    pub fn as_ranges(&self) -> Option<&[(super::Bitvector, super::Bitvector)]> {
        match self {
            MetadataValue::Str(_) => None,
            MetadataValue::Ranges(pairs) => Some(pairs),
        }
    }
}
