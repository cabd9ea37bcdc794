//! Content operation inputs and their validation.

use crate::code::validate_payload;
use crate::error::ContentError;
use crate::image::validate_image;
use crate::models::{CodePayload, Patch};

/// An image file attached to a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub bytes: Vec<u8>,
    /// MIME type declared by the client.
    pub mime_type: String,
    pub filename: String,
}

impl ImageFile {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            filename: filename.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ContentError> {
        validate_image(&self.bytes, &self.mime_type)
    }
}

/// Content of a new post or comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentInput {
    pub body: String,
    pub code: Option<CodePayload>,
    pub image: Option<ImageFile>,
}

impl ContentInput {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: CodePayload) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_image(mut self, image: ImageFile) -> Self {
        self.image = Some(image);
        self
    }

    /// Reject empty content and invalid attachments.
    pub fn validate(&self) -> Result<(), ContentError> {
        if self.body.trim().is_empty() && self.code.is_none() && self.image.is_none() {
            return Err(ContentError::validation(
                "content must include text, code or an image",
            ));
        }
        if let Some(code) = &self.code {
            validate_payload(code)?;
        }
        if let Some(image) = &self.image {
            image.validate()?;
        }
        Ok(())
    }
}

/// Changes to an existing post or comment.
///
/// `body: None` keeps the current text. Attachments are kept, cleared or
/// replaced according to their [`Patch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentUpdate {
    pub body: Option<String>,
    pub code: Patch<CodePayload>,
    pub image: Patch<ImageFile>,
}

impl ContentUpdate {
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn set_code(mut self, code: CodePayload) -> Self {
        self.code = Patch::Set(code);
        self
    }

    pub fn clear_code(mut self) -> Self {
        self.code = Patch::Clear;
        self
    }

    pub fn set_image(mut self, image: ImageFile) -> Self {
        self.image = Patch::Set(image);
        self
    }

    pub fn clear_image(mut self) -> Self {
        self.image = Patch::Clear;
        self
    }

    /// Validate the update against the row it applies to.
    ///
    /// The resulting row must still carry text, code or an image.
    pub fn validate(
        &self,
        current_body: &str,
        has_code: bool,
        has_image: bool,
    ) -> Result<(), ContentError> {
        let body = self.body.as_deref().unwrap_or(current_body);
        if body.trim().is_empty()
            && !self.code.present_after(has_code)
            && !self.image.present_after(has_image)
        {
            return Err(ContentError::validation(
                "update would leave the content empty",
            ));
        }
        if let Some(code) = self.code.as_set() {
            validate_payload(code)?;
        }
        if let Some(image) = self.image.as_set() {
            image.validate()?;
        }
        Ok(())
    }
}
