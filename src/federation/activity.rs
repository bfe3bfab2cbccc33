//! Inbound activity decoding
//!
//! An inbox body is decoded once into [`InboundActivity`]; the inbox
//! processor then matches on the variant instead of re-reading JSON.

use serde_json::Value;

use crate::error::{AppError, Result};

/// Note carried by an inbound Create
#[derive(Debug, Clone, PartialEq)]
pub struct NoteObject {
    pub id: String,
    pub attributed_to: String,
    /// The object exactly as received
    pub raw: Value,
}

/// The inbound activities the inbox understands
#[derive(Debug, Clone, PartialEq)]
pub enum InboundActivity {
    Follow {
        id: String,
        actor: String,
        object: String,
    },
    /// Undo of a Follow; `follow_object` is what the undone Follow targeted,
    /// unknown when the Follow is referenced by id only
    Undo {
        id: String,
        actor: String,
        follow_object: Option<String>,
    },
    Create {
        id: String,
        actor: String,
        note: NoteObject,
    },
    /// Anything else, carrying its `type`
    Unsupported(String),
}

impl InboundActivity {
    /// Decode an inbox request body
    ///
    /// # Errors
    /// `Parse` when the body is not JSON or a recognised activity is
    /// missing a required field.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::Parse(format!("Invalid activity JSON: {}", e)))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Parse("Activity has no type".to_string()))?;

        match kind {
            "Follow" => Ok(Self::Follow {
                id: required_str(value, "id")?,
                actor: reference(value, "actor")?,
                object: reference(value, "object")?,
            }),
            "Undo" => {
                let inner = value
                    .get("object")
                    .ok_or_else(|| AppError::Parse("Undo has no object".to_string()))?;
                // Only follows are undoable; a bare id can only name one
                if inner.is_string() {
                    return Ok(Self::Undo {
                        id: required_str(value, "id")?,
                        actor: reference(value, "actor")?,
                        follow_object: None,
                    });
                }
                if inner.get("type").and_then(Value::as_str) != Some("Follow") {
                    let inner_kind = inner.get("type").and_then(Value::as_str).unwrap_or("?");
                    return Ok(Self::Unsupported(format!("Undo/{}", inner_kind)));
                }
                Ok(Self::Undo {
                    id: required_str(value, "id")?,
                    actor: reference(value, "actor")?,
                    follow_object: Some(reference(inner, "object")?),
                })
            }
            "Create" => {
                let object = value
                    .get("object")
                    .ok_or_else(|| AppError::Parse("Create has no object".to_string()))?;
                let object_kind = object.get("type").and_then(Value::as_str);
                if object_kind != Some("Note") {
                    return Ok(Self::Unsupported(format!(
                        "Create/{}",
                        object_kind.unwrap_or("?")
                    )));
                }
                Ok(Self::Create {
                    id: required_str(value, "id")?,
                    actor: reference(value, "actor")?,
                    note: NoteObject {
                        id: required_str(object, "id")?,
                        attributed_to: reference(object, "attributedTo")?,
                        raw: object.clone(),
                    },
                })
            }
            other => Ok(Self::Unsupported(other.to_string())),
        }
    }

    /// The `type` label used in logs and metrics
    pub fn kind(&self) -> &str {
        match self {
            Self::Follow { .. } => "Follow",
            Self::Undo { .. } => "Undo",
            Self::Create { .. } => "Create",
            Self::Unsupported(kind) => kind,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Follow { id, .. } | Self::Undo { id, .. } | Self::Create { id, .. } => Some(id),
            Self::Unsupported(_) => None,
        }
    }

    pub fn actor(&self) -> Option<&str> {
        match self {
            Self::Follow { actor, .. } | Self::Undo { actor, .. } | Self::Create { actor, .. } => {
                Some(actor)
            }
            Self::Unsupported(_) => None,
        }
    }
}

fn required_str(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::Parse(format!("Missing {}", field)))
}

/// A field that is either a URI string or an object with an `id`
fn reference(value: &Value, field: &str) -> Result<String> {
    match value.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Object(obj)) => obj
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::Parse(format!("{} has no id", field))),
        _ => Err(AppError::Parse(format!("Missing {}", field))),
    }
}
