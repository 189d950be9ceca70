use serde::{Deserialize, Serialize};

use crate::media::MediaAsset;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlinePart {
    pub mime_type: String,
    pub base64_data: String,
}

impl InlinePart {
    pub fn from_asset(asset: &MediaAsset) -> Self {
        Self {
            mime_type: asset.mime_type().to_string(),
            base64_data: asset.to_base64(),
        }
    }
}

/// Canonical, transport-independent request. `image_parts` keeps caller
/// order: the prompt refers to "image 1", "image 2" by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt_text: String,
    pub image_parts: Vec<InlinePart>,
}

impl GenerationRequest {
    pub fn new(prompt_text: impl Into<String>, assets: &[MediaAsset]) -> Self {
        Self {
            prompt_text: prompt_text.into(),
            image_parts: assets.iter().map(InlinePart::from_asset).collect(),
        }
    }
}

pub const PROMPT_FIELD: &str = "prompt";

pub fn positional_image_field(index: usize) -> String {
    match index {
        0 => "subject".to_string(),
        1 => "reference".to_string(),
        other => format!("image_{}", other + 1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Composition {
    TextureWrap,
    TryOn,
}

impl Composition {
    pub const ALL: [Composition; 2] = [Composition::TextureWrap, Composition::TryOn];

    pub fn route(self) -> &'static str {
        match self {
            Composition::TextureWrap => "/api/generate-bag",
            Composition::TryOn => "/api/try-on",
        }
    }

    pub fn image_fields(self) -> [&'static str; 2] {
        match self {
            Composition::TextureWrap => ["bag", "fabric"],
            Composition::TryOn => ["person", "bag"],
        }
    }

    pub fn default_prompt(self) -> &'static str {
        match self {
            Composition::TextureWrap => "wrap the bag of image 1 in the texture of image 2",
            Composition::TryOn => {
                "make the person hold the bag naturally; match scale, perspective, lighting and shadows; realistic composite"
            }
        }
    }

    pub fn from_route(path: &str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or_default().trim_end_matches('/');
        Self::ALL
            .into_iter()
            .find(|composition| composition.route() == path)
    }

    pub fn missing_images_message(self) -> String {
        let [first, second] = self.image_fields();
        format!("Missing {first} or {second} image")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_keeps_asset_order() {
        let bag = MediaAsset::new(vec![1u8], "image/png", "bag.png");
        let fabric = MediaAsset::new(vec![2u8], "image/jpeg", "fabric.jpg");

        let forward = GenerationRequest::new("p", &[bag.clone(), fabric.clone()]);
        let reversed = GenerationRequest::new("p", &[fabric, bag]);

        assert_eq!(forward.image_parts[0].mime_type, "image/png");
        assert_eq!(forward.image_parts[1].mime_type, "image/jpeg");
        assert_eq!(forward.image_parts[0], reversed.image_parts[1]);
        assert_ne!(forward, reversed);
    }

    #[test]
    fn positional_fields_name_subject_then_reference() {
        assert_eq!(positional_image_field(0), "subject");
        assert_eq!(positional_image_field(1), "reference");
        assert_eq!(positional_image_field(2), "image_3");
    }

    #[test]
    fn compositions_resolve_from_routes() {
        assert_eq!(
            Composition::from_route("/api/generate-bag"),
            Some(Composition::TextureWrap)
        );
        assert_eq!(
            Composition::from_route("/api/try-on/?debug=1"),
            Some(Composition::TryOn)
        );
        assert_eq!(Composition::from_route("/api/unknown"), None);
        assert_eq!(
            Composition::TryOn.missing_images_message(),
            "Missing person or bag image"
        );
    }
}
