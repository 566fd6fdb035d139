//! The shared room document.
//!
//! A room document is stored as a flat field map. The publishable part is the
//! `{code, language}` pair ([`DocumentFields`]); `createdAt` is written once at
//! creation. Decoding is lenient: remote payloads written by older or buggy
//! clients may be partial, and a missing field falls back to a documented
//! default instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::language::{Language, WELCOME_TEMPLATE};

/// Field map as stored by the backend.
pub type Fields = serde_json::Map<String, Value>;

/// Wire name of the code field.
pub const FIELD_CODE: &str = "code";
/// Wire name of the language field.
pub const FIELD_LANGUAGE: &str = "language";
/// Wire name of the creation timestamp (Unix ms).
pub const FIELD_CREATED_AT: &str = "createdAt";

/// The publishable `{code, language}` pair.
///
/// Always written together so the pair is atomic at the store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentFields {
    pub code: String,
    pub language: Language,
}

impl DocumentFields {
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
        }
    }

    /// The canned template for a language.
    pub fn template(language: Language) -> Self {
        Self::new(language.template(), language)
    }

    /// Content of a freshly created room.
    pub fn welcome() -> Self {
        Self::new(WELCOME_TEMPLATE, Language::default())
    }

    /// Decode from a stored field map.
    ///
    /// Missing or non-string `code` → empty string; missing or unknown
    /// `language` → [`Language::Javascript`].
    pub fn from_fields(fields: &Fields) -> Self {
        let code = fields
            .get(FIELD_CODE)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let language = Language::from_wire(fields.get(FIELD_LANGUAGE).and_then(Value::as_str));
        Self { code, language }
    }

    /// Encode as a field map containing exactly `code` and `language`.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(FIELD_CODE.into(), Value::String(self.code.clone()));
        fields.insert(
            FIELD_LANGUAGE.into(),
            Value::String(self.language.to_string()),
        );
        fields
    }
}

/// A full room document as persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomDocument {
    pub fields: DocumentFields,
    /// Creation time (Unix ms), absent on documents written without one.
    pub created_at: Option<u64>,
}

impl RoomDocument {
    /// The initial document written by room creation.
    pub fn initial(created_at: u64) -> Self {
        Self {
            fields: DocumentFields::welcome(),
            created_at: Some(created_at),
        }
    }

    pub fn from_fields(fields: &Fields) -> Self {
        Self {
            fields: DocumentFields::from_fields(fields),
            created_at: fields.get(FIELD_CREATED_AT).and_then(Value::as_u64),
        }
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = self.fields.to_fields();
        if let Some(ts) = self.created_at {
            fields.insert(FIELD_CREATED_AT.into(), Value::from(ts));
        }
        fields
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_missing_language_defaults_to_javascript() {
        let doc = DocumentFields::from_fields(&fields(json!({ "code": "print(1)" })));
        assert_eq!(doc.code, "print(1)");
        assert_eq!(doc.language, Language::Javascript);
    }

    #[test]
    fn test_missing_code_is_empty() {
        let doc = DocumentFields::from_fields(&fields(json!({ "language": "python" })));
        assert_eq!(doc.code, "");
        assert_eq!(doc.language, Language::Python);
    }

    #[test]
    fn test_wrong_types_fall_back() {
        let doc = DocumentFields::from_fields(&fields(json!({ "code": 42, "language": 7 })));
        assert_eq!(doc, DocumentFields::default());
    }

    #[test]
    fn test_to_fields_writes_exactly_the_pair() {
        let encoded = DocumentFields::new("x", Language::Cpp).to_fields();
        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded[FIELD_LANGUAGE], json!("cpp"));
    }

    #[test]
    fn test_room_document_keeps_created_at() {
        let doc = RoomDocument::initial(1_700_000_000_000);
        let decoded = RoomDocument::from_fields(&doc.to_fields());
        assert_eq!(decoded, doc);
        assert_eq!(decoded.fields.code, WELCOME_TEMPLATE);
    }
}
