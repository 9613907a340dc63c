use std::collections::HashMap;

use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Image,
    Video,
    Auto,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceType::Image => "image",
            ResourceType::Video => "video",
            ResourceType::Auto => "auto",
        };
        write!(f, "{s}")
    }
}

/// Where a file part is stored. Chosen from the form field name only, never
/// from the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub folder: String,
    pub resource_type: ResourceType,
}

impl Destination {
    pub fn for_field(root: &str, field_name: &str) -> Self {
        let (sub, resource_type) = match field_name {
            "thumbnail" => ("thumbnails", ResourceType::Image),
            "banner" => ("banners", ResourceType::Image),
            "profile_picture" => ("profiles", ResourceType::Image),
            "video" => ("videos", ResourceType::Video),
            _ => ("others", ResourceType::Auto),
        };
        Self {
            folder: format!("{}/{}", root.trim_end_matches('/'), sub),
            resource_type,
        }
    }
}

/// What the decoder knows about a file part.
#[derive(Debug, Clone, Default)]
pub struct ObjectInfo {
    pub field_name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

/// A transfer in flight for one file part of the current request.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    /// Position of the part among the request's file parts.
    pub index: usize,
    pub destination: Destination,
    pub info: ObjectInfo,
}

/// A stored object as reported by the storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub secure_url: String,
    pub public_id: String,
    pub resource_type: ResourceType,
    pub bytes: u64,
    pub format: Option<String>,
    pub original_filename: Option<String>,
    pub content_type: Option<String>,
}

/// Completed uploads keyed by form field. Fields keep the order in which they
/// first appeared in the request, results keep part order within a field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMap {
    entries: Vec<(String, Vec<UploadResult>)>,
}

impl UploadMap {
    pub fn push(&mut self, field: &str, result: UploadResult) {
        match self.entries.iter_mut().find(|(name, _)| name == field) {
            Some((_, results)) => results.push(result),
            None => self.entries.push((field.to_string(), vec![result])),
        }
    }

    pub fn get(&self, field: &str) -> &[UploadResult] {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, results)| results.as_slice())
            .unwrap_or(&[])
    }

    pub fn first(&self, field: &str) -> Option<&UploadResult> {
        self.get(field).first()
    }

    /// First upload for `field`, or `BadRequest` if none was sent.
    pub fn require(&self, field: &str) -> Result<&UploadResult, ApiError> {
        self.first(field)
            .ok_or_else(|| ApiError::BadRequest(format!("{field} file is required")))
    }

    pub fn require_url(&self, field: &str) -> Result<String, ApiError> {
        self.require(field).map(|r| r.secure_url.clone())
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadResult> {
        self.entries.iter().flat_map(|(_, results)| results.iter())
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, r)| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for UploadMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, results) in &self.entries {
            map.serialize_entry(name, results)?;
        }
        map.end()
    }
}

/// Scalar multipart fields. A repeated name keeps its last value.
#[derive(Debug, Clone, Default)]
pub struct FormFields(HashMap<String, String>);

impl FormFields {
    pub fn insert(&mut self, name: String, value: String) {
        self.0.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Trimmed, non-empty value of `name`.
    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn require(&self, name: &str) -> Result<String, ApiError> {
        self.text(name)
            .ok_or_else(|| ApiError::BadRequest(format!("{name} is required")))
    }

    pub fn flag(&self, name: &str) -> Result<Option<bool>, ApiError> {
        match self.text(name).as_deref() {
            None => Ok(None),
            Some("true") | Some("1") => Ok(Some(true)),
            Some("false") | Some("0") => Ok(Some(false)),
            Some(_) => Err(ApiError::BadRequest(format!("{name} must be a boolean"))),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str) -> UploadResult {
        UploadResult {
            secure_url: url.to_string(),
            public_id: url.to_string(),
            resource_type: ResourceType::Image,
            bytes: 1,
            format: None,
            original_filename: None,
            content_type: None,
        }
    }

    #[test]
    fn destination_is_classified_by_field_name() {
        let thumb = Destination::for_field("vidtube", "thumbnail");
        assert_eq!(thumb.folder, "vidtube/thumbnails");
        assert_eq!(thumb.resource_type, ResourceType::Image);

        assert_eq!(Destination::for_field("vidtube", "banner").folder, "vidtube/banners");
        assert_eq!(
            Destination::for_field("vidtube/", "profile_picture").folder,
            "vidtube/profiles"
        );

        let video = Destination::for_field("vidtube", "video");
        assert_eq!(video.folder, "vidtube/videos");
        assert_eq!(video.resource_type, ResourceType::Video);

        let other = Destination::for_field("vidtube", "attachment");
        assert_eq!(other.folder, "vidtube/others");
        assert_eq!(other.resource_type, ResourceType::Auto);
    }

    #[test]
    fn upload_map_keeps_field_and_part_order() {
        let mut map = UploadMap::default();
        map.push("thumbnail", result("t1"));
        map.push("video", result("v1"));
        map.push("thumbnail", result("t2"));

        assert_eq!(map.fields().collect::<Vec<_>>(), vec!["thumbnail", "video"]);
        let thumbs: Vec<_> = map.get("thumbnail").iter().map(|r| r.secure_url.as_str()).collect();
        assert_eq!(thumbs, vec!["t1", "t2"]);
        assert_eq!(map.len(), 3);
        assert!(map.get("banner").is_empty());
        assert!(matches!(map.require_url("banner"), Err(ApiError::BadRequest(_))));
        assert_eq!(map.require_url("video").unwrap(), "v1");
    }

    #[test]
    fn form_fields_last_value_wins() {
        let mut fields = FormFields::default();
        fields.insert("title".into(), "first".into());
        fields.insert("title".into(), "  second ".into());
        assert_eq!(fields.text("title").as_deref(), Some("second"));
        assert!(fields.require("missing").is_err());
    }

    #[test]
    fn form_flag_parsing() {
        let mut fields = FormFields::default();
        fields.insert("is_public".into(), "false".into());
        assert_eq!(fields.flag("is_public").unwrap(), Some(false));
        fields.insert("is_public".into(), "maybe".into());
        assert!(fields.flag("is_public").is_err());
        assert_eq!(fields.flag("absent").unwrap(), None);
    }
}
