//! Backend priority presets.

use serde::{Deserialize, Serialize};

use crate::matcher::Backend;
use crate::result::HallarError;

/// Order in which recognition backends are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Text backends first: VLM, OCR, template, legacy template
    TextFirst,
    /// Image backends first: template, legacy template, VLM, OCR
    ImageFirst,
    /// One text backend when a label is given, then the image backends
    #[default]
    Default,
}

/// What a request offers the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanInputs {
    /// Request carries a reference image id
    pub has_asset: bool,
    /// Request carries a text label
    pub has_label: bool,
    /// Vision backend is registered and not known to be unavailable
    pub vision_ready: bool,
}

impl Strategy {
    /// Ordered backends to try for one poll iteration.
    ///
    /// Backends whose input is absent are left out.
    #[must_use]
    pub fn plan(self, inputs: PlanInputs) -> Vec<Backend> {
        let order: &[Backend] = match self {
            Self::TextFirst => &[
                Backend::Vision,
                Backend::Ocr,
                Backend::Template,
                Backend::LegacyTemplate,
            ],
            Self::ImageFirst => &[
                Backend::Template,
                Backend::LegacyTemplate,
                Backend::Vision,
                Backend::Ocr,
            ],
            Self::Default if inputs.has_label && inputs.vision_ready => &[
                Backend::Vision,
                Backend::Template,
                Backend::LegacyTemplate,
            ],
            Self::Default if inputs.has_label => {
                &[Backend::Ocr, Backend::Template, Backend::LegacyTemplate]
            }
            Self::Default => &[Backend::Template, Backend::LegacyTemplate],
        };
        order
            .iter()
            .copied()
            .filter(|b| (!b.needs_asset() || inputs.has_asset) && (!b.needs_label() || inputs.has_label))
            .collect()
    }

    /// Stable name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TextFirst => "text-first",
            Self::ImageFirst => "image-first",
            Self::Default => "default",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Strategy {
    type Err = HallarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "text-first" => Ok(Self::TextFirst),
            "image-first" => Ok(Self::ImageFirst),
            "default" => Ok(Self::Default),
            other => Err(HallarError::config(format!(
                "unknown strategy '{other}' (expected text-first, image-first or default)"
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ALL: PlanInputs = PlanInputs {
        has_asset: true,
        has_label: true,
        vision_ready: true,
    };

    #[test]
    fn test_text_first_order() {
        assert_eq!(
            Strategy::TextFirst.plan(ALL),
            vec![
                Backend::Vision,
                Backend::Ocr,
                Backend::Template,
                Backend::LegacyTemplate
            ]
        );
    }

    #[test]
    fn test_image_first_order() {
        assert_eq!(
            Strategy::ImageFirst.plan(ALL),
            vec![
                Backend::Template,
                Backend::LegacyTemplate,
                Backend::Vision,
                Backend::Ocr
            ]
        );
    }

    #[test]
    fn test_default_prefers_vision_over_ocr() {
        assert_eq!(
            Strategy::Default.plan(ALL),
            vec![Backend::Vision, Backend::Template, Backend::LegacyTemplate]
        );
        let no_vision = PlanInputs {
            vision_ready: false,
            ..ALL
        };
        assert_eq!(
            Strategy::Default.plan(no_vision),
            vec![Backend::Ocr, Backend::Template, Backend::LegacyTemplate]
        );
    }

    #[test]
    fn test_default_without_label_is_image_only() {
        let inputs = PlanInputs {
            has_label: false,
            ..ALL
        };
        assert_eq!(
            Strategy::Default.plan(inputs),
            vec![Backend::Template, Backend::LegacyTemplate]
        );
    }

    #[test]
    fn test_absent_inputs_drop_backends() {
        let label_only = PlanInputs {
            has_asset: false,
            ..ALL
        };
        assert_eq!(
            Strategy::ImageFirst.plan(label_only),
            vec![Backend::Vision, Backend::Ocr]
        );
        let nothing = PlanInputs {
            has_asset: false,
            has_label: false,
            vision_ready: false,
        };
        assert!(Strategy::TextFirst.plan(nothing).is_empty());
    }

    #[test]
    fn test_parse() {
        assert_eq!("text-first".parse::<Strategy>().unwrap(), Strategy::TextFirst);
        assert_eq!("IMAGE_FIRST".parse::<Strategy>().unwrap(), Strategy::ImageFirst);
        assert_eq!("default".parse::<Strategy>().unwrap(), Strategy::Default);
        assert!("random".parse::<Strategy>().is_err());
        assert_eq!(Strategy::TextFirst.to_string(), "text-first");
    }
}
