//! Signature embedder service.
//!
//! Installs a PKCS#7 signature (and optionally the extended metadata
//! signature) as streams at the root of a compound document.

use crate::domain::comdoc::Container;
use crate::infra::config::EngineConfiguration;
use crate::infra::error::{SigningError, SigningResult};
use std::io::{Read, Seek, Write};

/// Name of the digital signature stream
pub const DIGITAL_SIGNATURE_STREAM: &str = "\u{0005}DigitalSignature";

/// Name of the extended signature stream
pub const DIGITAL_SIGNATURE_EX_STREAM: &str = "\u{0005}MsiDigitalSignatureEx";

fn root_path(name: &str) -> String {
    format!("/{name}")
}

#[derive(Debug, Clone, Copy)]
pub struct SignatureEmbedder {
    replace_existing: bool,
    verify_after_commit: bool,
}

impl Default for SignatureEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureEmbedder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            replace_existing: false,
            verify_after_commit: true,
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfiguration) -> Self {
        Self {
            replace_existing: config.replace_existing_signature,
            verify_after_commit: config.verify_after_commit,
        }
    }

    #[must_use]
    pub fn with_replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }

    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify_after_commit = verify;
        self
    }

    /// Embed `signature` (and `signature_ex` if given), then commit.
    ///
    /// Returns the container to keep working with: when verification is on
    /// this is a fresh container re-opened over the same backing store.
    ///
    /// # Errors
    /// `ValidationError` for an empty signature, an already signed container
    /// when replacement is not allowed, or a signature that does not read
    /// back after re-opening.
    pub fn embed<F: Read + Write + Seek>(
        &self,
        mut container: Container<F>,
        signature: &[u8],
        signature_ex: Option<&[u8]>,
    ) -> SigningResult<Container<F>> {
        if signature.is_empty() {
            return Err(SigningError::ValidationError(
                "Refusing to embed an empty signature".into(),
            ));
        }

        let sig_path = root_path(DIGITAL_SIGNATURE_STREAM);
        let ex_path = root_path(DIGITAL_SIGNATURE_EX_STREAM);
        let signed = container.exists(&sig_path) || container.exists(&ex_path);
        if signed && !self.replace_existing {
            return Err(SigningError::ValidationError(
                "Container is already signed; enable replace_existing_signature to overwrite"
                    .into(),
            ));
        }

        container.put_stream(&sig_path, signature)?;
        match signature_ex {
            Some(ex) => {
                container.put_stream(&ex_path, ex)?;
            }
            // A stale extended signature would not match the new one.
            None if container.exists(&ex_path) => container.remove_stream(&ex_path)?,
            None => {}
        }
        container.commit()?;
        log::info!(
            "Embedded {} byte signature{}",
            signature.len(),
            if signature_ex.is_some() { " with extended signature" } else { "" }
        );

        if !self.verify_after_commit {
            return Ok(container);
        }

        let mut reopened = Container::open(container.into_inner())?;
        if reopened.read_stream_to_vec(&sig_path)? != signature {
            return Err(SigningError::ValidationError(
                "Signature stream did not read back after commit".into(),
            ));
        }
        if let Some(ex) = signature_ex {
            if reopened.read_stream_to_vec(&ex_path)? != ex {
                return Err(SigningError::ValidationError(
                    "Extended signature stream did not read back after commit".into(),
                ));
            }
        }
        log::debug!("Signature verified after re-open");
        Ok(reopened)
    }

    /// The embedded signature, if any.
    ///
    /// # Errors
    /// Propagates corruption found while reading the stream.
    pub fn extract<F: Read + Write + Seek>(
        container: &mut Container<F>,
    ) -> SigningResult<Option<Vec<u8>>> {
        let path = root_path(DIGITAL_SIGNATURE_STREAM);
        if !container.exists(&path) {
            return Ok(None);
        }
        container.read_stream_to_vec(&path).map(Some)
    }

    /// Remove both signature streams and commit. Returns whether anything
    /// was removed.
    ///
    /// # Errors
    /// Propagates errors from removal or commit.
    pub fn strip<F: Read + Write + Seek>(container: &mut Container<F>) -> SigningResult<bool> {
        let mut removed = false;
        for name in [DIGITAL_SIGNATURE_STREAM, DIGITAL_SIGNATURE_EX_STREAM] {
            let path = root_path(name);
            if container.exists(&path) {
                container.remove_stream(&path)?;
                removed = true;
            }
        }
        if removed {
            container.commit()?;
            log::info!("Removed embedded signature");
        }
        Ok(removed)
    }
}
