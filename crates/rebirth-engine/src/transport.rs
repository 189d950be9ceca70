use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use multipart::server::Multipart as MultipartReader;
use rebirth_contracts::media::{
    extension_for_mime, guess_image_mime, with_extension, DEFAULT_IMAGE_MIME,
};
use rebirth_contracts::request::{positional_image_field, PROMPT_FIELD};
use rebirth_contracts::{GenerationRequest, InlinePart, MediaAsset};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use serde_json::{json, Value};

use crate::classify::inline_image_of;
use crate::error::{PipelineError, Result};

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Multipart,
    JsonInline,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Multipart => "multipart",
            Transport::JsonInline => "json",
        }
    }
}

#[derive(Debug, Clone)]
struct ImageSlot {
    field: String,
    asset: MediaAsset,
}

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    prompt: String,
    slots: Vec<ImageSlot>,
}

impl RequestBuilder {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            slots: Vec::new(),
        }
    }

    pub fn image(self, asset: MediaAsset) -> Self {
        let field = positional_image_field(self.slots.len());
        self.named_image(field, asset)
    }

    pub fn named_image(mut self, field: impl Into<String>, asset: MediaAsset) -> Self {
        self.slots.push(ImageSlot {
            field: field.into(),
            asset,
        });
        self
    }

    pub fn canonical(&self) -> GenerationRequest {
        GenerationRequest {
            prompt_text: self.prompt.clone(),
            image_parts: self
                .slots
                .iter()
                .map(|slot| InlinePart::from_asset(&slot.asset))
                .collect(),
        }
    }

    pub fn build(&self, transport: Transport) -> Result<OutgoingRequest> {
        if self.slots.is_empty() {
            return Err(PipelineError::InputValidation(
                "at least one image is required".to_string(),
            ));
        }
        let canonical = self.canonical();
        match transport {
            Transport::JsonInline => {
                let body = serde_json::to_vec(&render_json(&canonical)).map_err(|err| {
                    PipelineError::InputValidation(format!("failed to render JSON body: {err}"))
                })?;
                Ok(OutgoingRequest {
                    transport,
                    content_type: JSON_CONTENT_TYPE.to_string(),
                    body,
                })
            }
            Transport::Multipart => {
                let fields = self
                    .slots
                    .iter()
                    .map(|slot| slot.field.clone())
                    .collect::<Vec<String>>();
                let (boundary, body) = render_multipart(&canonical, &fields)?;
                Ok(OutgoingRequest {
                    transport,
                    content_type: format!("multipart/form-data; boundary={boundary}"),
                    body,
                })
            }
        }
    }
}

pub fn build(prompt: &str, assets: &[MediaAsset], transport: Transport) -> Result<OutgoingRequest> {
    assets
        .iter()
        .cloned()
        .fold(RequestBuilder::new(prompt), RequestBuilder::image)
        .build(transport)
}

pub fn text_request(prompt: &str) -> OutgoingRequest {
    let payload = json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": prompt }],
        }],
    });
    OutgoingRequest {
        transport: Transport::JsonInline,
        content_type: JSON_CONTENT_TYPE.to_string(),
        body: payload.to_string().into_bytes(),
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    transport: Transport,
    content_type: String,
    body: Vec<u8>,
}

impl OutgoingRequest {
    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn decode(&self) -> Result<GenerationRequest> {
        match self.transport {
            Transport::JsonInline => decode_json(&self.body),
            Transport::Multipart => {
                Ok(decode_multipart(&self.content_type, &self.body)?.into_generation_request())
            }
        }
    }
}

pub fn render_json(request: &GenerationRequest) -> Value {
    let mut parts = vec![json!({ "text": request.prompt_text })];
    parts.extend(request.image_parts.iter().map(|part| {
        json!({
            "inlineData": {
                "mimeType": part.mime_type,
                "data": part.base64_data,
            }
        })
    }));
    json!({
        "contents": [{
            "role": "user",
            "parts": parts,
        }],
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"],
        },
    })
}

fn render_multipart(request: &GenerationRequest, fields: &[String]) -> Result<(String, Vec<u8>)> {
    let mut form = MultipartForm::new().text(PROMPT_FIELD, request.prompt_text.clone());
    for (part, field) in request.image_parts.iter().zip(fields) {
        let bytes = BASE64.decode(part.base64_data.as_bytes()).map_err(|err| {
            PipelineError::InputValidation(format!("image '{field}' is not valid base64: {err}"))
        })?;
        let file_part = MultipartPart::bytes(bytes)
            .file_name(with_extension(field, extension_for_mime(&part.mime_type)))
            .mime_str(&part.mime_type)
            .map_err(|err| {
                PipelineError::InputValidation(format!(
                    "image '{field}' has an invalid mime type '{}': {err}",
                    part.mime_type
                ))
            })?;
        form = form.part(field.clone(), file_part);
    }
    let boundary = form.boundary().to_string();
    let mut body = Vec::new();
    form.into_reader().read_to_end(&mut body).map_err(|err| {
        PipelineError::InputValidation(format!("failed to render multipart body: {err}"))
    })?;
    Ok((boundary, body))
}

pub fn decode_json(body: &[u8]) -> Result<GenerationRequest> {
    let payload: Value = serde_json::from_slice(body).map_err(|err| {
        PipelineError::InputValidation(format!("request body is not JSON: {err}"))
    })?;
    let parts = payload
        .get("contents")
        .and_then(Value::as_array)
        .and_then(|contents| contents.first())
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            PipelineError::InputValidation("request body has no contents[0].parts".to_string())
        })?;

    let mut texts = Vec::new();
    let mut image_parts = Vec::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            texts.push(text);
        } else if let Some((mime, data)) = inline_image_of(part) {
            image_parts.push(InlinePart {
                mime_type: mime.unwrap_or(DEFAULT_IMAGE_MIME).to_string(),
                base64_data: data.to_string(),
            });
        }
    }
    Ok(GenerationRequest {
        prompt_text: texts.join("\n"),
        image_parts,
    })
}

#[derive(Debug, Clone, Default)]
pub struct MultipartUpload {
    pub prompt: Option<String>,
    pub files: Vec<(String, MediaAsset)>,
}

impl MultipartUpload {
    pub fn file(&self, field: &str) -> Option<&MediaAsset> {
        self.files
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, asset)| asset)
    }

    pub fn into_generation_request(self) -> GenerationRequest {
        let assets = self
            .files
            .into_iter()
            .map(|(_, asset)| asset)
            .collect::<Vec<MediaAsset>>();
        GenerationRequest::new(self.prompt.unwrap_or_default(), &assets)
    }
}

/// Parts without a filename are form fields; only `prompt` is kept. Parts
/// with a filename are images.
pub fn decode_multipart(content_type: &str, body: &[u8]) -> Result<MultipartUpload> {
    let boundary = boundary_from_content_type(content_type).ok_or_else(|| {
        PipelineError::InputValidation(format!(
            "expected multipart/form-data with a boundary, got '{content_type}'"
        ))
    })?;
    let malformed =
        |err: std::io::Error| PipelineError::InputValidation(format!("malformed multipart body: {err}"));

    let mut reader = MultipartReader::with_body(body, boundary);
    let mut upload = MultipartUpload::default();
    while let Some(mut field) = reader.read_entry().map_err(malformed)? {
        let mut data = Vec::new();
        field.data.read_to_end(&mut data).map_err(malformed)?;
        let name = field.headers.name.to_string();
        match field.headers.filename.clone() {
            None => {
                if name == PROMPT_FIELD {
                    upload.prompt = Some(String::from_utf8_lossy(&data).into_owned());
                }
            }
            Some(file_name) => {
                let mime = field
                    .headers
                    .content_type
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| guess_image_mime(&file_name).to_string());
                upload.files.push((name, MediaAsset::new(data, mime, file_name)));
            }
        }
    }
    Ok(upload)
}

fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut pieces = content_type.split(';');
    let essence = pieces.next()?.trim();
    if !essence.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    pieces
        .filter_map(|piece| piece.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}
