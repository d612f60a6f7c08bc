// ============================================
// Feature Vectorizer Module
// ============================================
// Projects candidates and history records onto one fixed 12-slot layout
// so a single regression model covers both item kinds.
//
// Layout:
//   [0]      relevance
//   [1..7]   scene craft (desc_style, perspective, sensory, thought, tension, reality)
//   [7..12]  character dynamics (char_count, char_mental, char_belief, char_trauma, char_voice)

use crate::models::{CandidateItem, HistoryRecord, ItemAttributes};
use ndarray::Array2;

/// Feature vector size (relevance + 6 scene + 5 character)
pub const FEATURE_VECTOR_SIZE: usize = 12;

const SCENE_OFFSET: usize = 1;
const CHARACTER_OFFSET: usize = 7;

/// Positionally bound feature vector; coefficients of a trained model follow this order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_VECTOR_SIZE]);

impl FeatureVector {
    pub fn from_parts(relevance: f64, attributes: &ItemAttributes) -> Self {
        let mut slots = [0.0; FEATURE_VECTOR_SIZE];
        slots[0] = relevance;

        match attributes {
            ItemAttributes::SceneCraft(scene) => {
                for (i, v) in scene.values().into_iter().enumerate() {
                    slots[SCENE_OFFSET + i] = v;
                }
            }
            ItemAttributes::CharacterDynamics(character) => {
                for (i, v) in character.values().into_iter().enumerate() {
                    slots[CHARACTER_OFFSET + i] = v;
                }
            }
        }

        Self(slots)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Anything that can be projected onto the shared feature layout.
pub trait Vectorize {
    fn vectorize(&self) -> FeatureVector;
}

impl Vectorize for CandidateItem {
    fn vectorize(&self) -> FeatureVector {
        FeatureVector::from_parts(self.relevance, &self.attributes)
    }
}

impl Vectorize for HistoryRecord {
    fn vectorize(&self) -> FeatureVector {
        FeatureVector::from_parts(self.relevance, &self.attributes)
    }
}

/// Stack vectors into a (batch_size × FEATURE_VECTOR_SIZE) matrix.
pub fn feature_matrix(vectors: &[FeatureVector]) -> Array2<f64> {
    Array2::from_shape_fn((vectors.len(), FEATURE_VECTOR_SIZE), |(i, j)| {
        vectors[i].0[j]
    })
}
