//! `ImageSizeValidator`: the activity validator behind scenario S5 — two
//! `image` inputs must share size and spacing, or the activity launch is
//! cancelled with a message naming the mismatched attributes.

use std::sync::Arc;

use sight_config::{ObjectValidator, ValidationOutcome};
use sight_core::Object;

use crate::data::ImageStub;

pub struct ImageSizeValidator;

impl ObjectValidator for ImageSizeValidator {
    fn validate(&self, objects: &[Arc<Object>]) -> ValidationOutcome {
        let images: Vec<ImageStub> = objects
            .iter()
            .filter(|o| o.type_tag() == "image")
            .map(|o| *o.read::<ImageStub>())
            .collect();

        let Some(first) = images.first() else {
            return ValidationOutcome::pass(); // nothing to compare
        };

        let mut mismatches = Vec::new();
        for (index, image) in images.iter().enumerate().skip(1) {
            if image.size != first.size {
                mismatches.push(format!("image[{index}].size {:?} != image[0].size {:?}", image.size, first.size));
            }
            if image.spacing != first.spacing {
                mismatches.push(format!(
                    "image[{index}].spacing {:?} != image[0].spacing {:?}",
                    image.spacing, first.spacing
                ));
            }
        }

        if mismatches.is_empty() {
            ValidationOutcome::pass()
        } else {
            ValidationOutcome::fail(mismatches.join("; "))
        }
    }
}
