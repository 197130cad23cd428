// Copyright 2024-2026 StegoChannel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The feature extractor (§4.5): turns an observable property of a post
//! (length, media presence, punctuation, first-word category) into payload
//! bits, in a fixed, per-channel-configured order.

use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

/// One configured feature, in the order a channel has selected them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Len,
    Media,
    Qmark,
    /// 2-bit first-word category (§4.5); reserved identifier `wcount` maps
    /// to nothing and is rejected at config-parse time, never reached here.
    Fword,
}

impl FeatureKind {
    /// Number of payload bits this feature contributes per post.
    pub fn bit_width(self) -> usize {
        match self {
            FeatureKind::Len | FeatureKind::Media | FeatureKind::Qmark => 1,
            FeatureKind::Fword => 2,
        }
    }
}

/// Total bits contributed by one post under `feature_set`.
pub fn feature_bit_count(feature_set: &[FeatureKind]) -> usize {
    feature_set.iter().map(|f| f.bit_width()).sum()
}

const PRONOUNS: &[&str] = &[
    "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them", "this", "that",
];
// "this"/"that" are demonstrative and would otherwise also fit here; they're
// listed only under PRONOUNS above so the three categories stay disjoint and
// `fword_bits`'s first-match order never matters.
const DETERMINERS: &[&str] = &["a", "an", "the", "these", "those", "some", "any"];
const COMMON_VERBS: &[&str] = &[
    "is", "am", "are", "was", "were", "be", "been", "do", "does", "did", "have", "has", "had",
    "go", "goes", "went", "get", "gets", "got", "make", "makes", "made", "think", "thinks",
    "thought", "know", "knows", "knew", "want", "wants", "wanted", "see", "sees", "saw", "say",
    "says", "said",
];

/// Collapse whitespace runs to a single space, trim the ends, and apply
/// Unicode NFC normalization (§4.5 "Text normalization").
pub fn normalize_text(text: &str) -> String {
    let nfc: String = text.nfc().collect();
    let mut out = String::with_capacity(nfc.len());
    let mut last_was_space = false;
    for ch in nfc.chars() {
        if ch.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Count of Unicode extended grapheme clusters in `text`.
pub fn grapheme_count(text: &str) -> usize {
    text.graphemes(true).count()
}

fn fword_bits(normalized: &str) -> (u8, u8) {
    let first = normalized.split(' ').find(|w| !w.is_empty()).unwrap_or("");
    let lowered = first.to_lowercase();
    if PRONOUNS.contains(&lowered.as_str()) {
        (0, 0)
    } else if DETERMINERS.contains(&lowered.as_str()) {
        (0, 1)
    } else if COMMON_VERBS.contains(&lowered.as_str()) {
        (1, 0)
    } else {
        (1, 1)
    }
}

/// `extract_bits(text, has_media, feature_set, threshold)`: emits bits in
/// the fixed order of `feature_set`.
pub fn extract_bits(text: &str, has_media: bool, feature_set: &[FeatureKind], length_threshold: usize) -> Vec<u8> {
    let normalized = normalize_text(text);
    let mut bits = Vec::with_capacity(feature_bit_count(feature_set));
    for feature in feature_set {
        match feature {
            FeatureKind::Len => {
                bits.push((grapheme_count(&normalized) >= length_threshold) as u8);
            }
            FeatureKind::Media => {
                bits.push(has_media as u8);
            }
            FeatureKind::Qmark => {
                bits.push(normalized.contains('?') as u8);
            }
            FeatureKind::Fword => {
                let (hi, lo) = fword_bits(&normalized);
                bits.push(hi);
                bits.push(lo);
            }
        }
    }
    bits
}
