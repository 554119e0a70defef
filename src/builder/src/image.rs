//! Base-image views and the pluggable image-source seam.

use lamina_core::error::{LaminaError, Result};

/// The slice of a resolved base image's configuration that later stages
/// inherit during analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageView {
    /// Configured environment, in definition order
    pub env: Vec<(String, String)>,
}

impl ImageView {
    /// View of the no-base sentinel: empty configuration.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_env(env: Vec<(String, String)>) -> Self {
        Self { env }
    }
}

/// Resolves an image reference to its view.
///
/// The dependency analyzer handles the no-base sentinel and references to
/// the stage under analysis itself; every other reference is delegated
/// here. The wider application supplies a registry-backed implementation;
/// the engine never performs transport itself.
pub trait ImageSource {
    fn resolve_image(&self, reference: &str) -> Result<ImageView>;
}

impl<F> ImageSource for F
where
    F: Fn(&str) -> Result<ImageView>,
{
    fn resolve_image(&self, reference: &str) -> Result<ImageView> {
        self(reference)
    }
}

/// Source that fails every lookup, for builds whose scripts never reference
/// external images.
pub struct NoExternalImages;

impl ImageSource for NoExternalImages {
    fn resolve_image(&self, reference: &str) -> Result<ImageView> {
        Err(LaminaError::AnalysisError(format!(
            "no image source configured for reference '{}'",
            reference
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_as_image_source() {
        let source = |reference: &str| {
            Ok(ImageView::with_env(vec![(
                "REF".to_string(),
                reference.to_string(),
            )]))
        };
        let view = source.resolve_image("alpine:3.19").unwrap();
        assert_eq!(view.env[0].1, "alpine:3.19");
    }

    #[test]
    fn test_no_external_images_fails() {
        assert!(NoExternalImages.resolve_image("anything").is_err());
    }
}
