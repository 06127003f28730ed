// Symbol model and the in-memory symbol index

pub mod symbol_index;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use symbol_index::{IndexStats, SymbolIndex};

/// A code symbol (function, type, variable, etc.) as produced by the
/// upstream extraction stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub location: Location,
    pub language: String,
    /// Id of the enclosing symbol, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Symbol {
    /// Minimal symbol, mostly useful for building fixtures
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: SymbolKind,
        file: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            location: Location::at(file, 1, 0),
            language: language.into(),
            parent_id: None,
            signature: None,
            documentation: None,
            module: None,
            namespace: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.kind, SymbolKind::Function | SymbolKind::Method | SymbolKind::Constructor)
    }
}

/// Symbol kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Constructor,
    Class,
    Struct,
    Interface,
    Trait,
    Enum,
    TypeAlias,
    Type,
    Variable,
    Constant,
    Field,
    Property,
    Parameter,
    Module,
    Namespace,
    Import,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Interface => "interface",
            SymbolKind::Trait => "trait",
            SymbolKind::Enum => "enum",
            SymbolKind::TypeAlias => "type_alias",
            SymbolKind::Type => "type",
            SymbolKind::Variable => "variable",
            SymbolKind::Constant => "constant",
            SymbolKind::Field => "field",
            SymbolKind::Property => "property",
            SymbolKind::Parameter => "parameter",
            SymbolKind::Module => "module",
            SymbolKind::Namespace => "namespace",
            SymbolKind::Import => "import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "function" => SymbolKind::Function,
            "method" => SymbolKind::Method,
            "constructor" => SymbolKind::Constructor,
            "class" => SymbolKind::Class,
            "struct" => SymbolKind::Struct,
            "interface" => SymbolKind::Interface,
            "trait" => SymbolKind::Trait,
            "enum" => SymbolKind::Enum,
            "type_alias" => SymbolKind::TypeAlias,
            "type" => SymbolKind::Type,
            "variable" => SymbolKind::Variable,
            "constant" => SymbolKind::Constant,
            "field" => SymbolKind::Field,
            "property" => SymbolKind::Property,
            "parameter" => SymbolKind::Parameter,
            "module" => SymbolKind::Module,
            "namespace" => SymbolKind::Namespace,
            "import" => SymbolKind::Import,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location in source code. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Location {
    pub fn at(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            file_id: None,
            line,
            column,
            end_line: line,
            end_column: column,
        }
    }

    pub fn span(file: impl Into<String>, line: u32, column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            file: file.into(),
            file_id: None,
            line,
            column,
            end_line,
            end_column,
        }
    }
}

/// Directed edge between two symbols
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_id: String,
    pub to_id: String,
    pub kind: RelationshipKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Relationship {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, kind: RelationshipKind) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            kind,
            location: None,
        }
    }
}

/// Relationship kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Calls,
    References,
    Uses,
    DependsOn,
    Defines,
    Implements,
    Extends,
    Contains,
    Imports,
    Exports,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::Calls => "calls",
            RelationshipKind::References => "references",
            RelationshipKind::Uses => "uses",
            RelationshipKind::DependsOn => "depends_on",
            RelationshipKind::Defines => "defines",
            RelationshipKind::Implements => "implements",
            RelationshipKind::Extends => "extends",
            RelationshipKind::Contains => "contains",
            RelationshipKind::Imports => "imports",
            RelationshipKind::Exports => "exports",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized form of an index: the records fed to `update_index`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}
