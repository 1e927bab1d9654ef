// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How much the adapter trusts the extracted prompt text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Which side channel a [`SessionPromptRecord`] was recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureSource {
    Notify,
    Telemetry,
}

/// A recovered user prompt,`hash` is
/// `sha256(providerEventName + text + canonical(payload))` so records with
/// identical content from different capture paths collide deliberately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPromptRecord {
    pub text: Option<String>,
    pub hash: String,
    pub confidence: Confidence,
    #[serde(rename = "captureSource")]
    pub capture_source: CaptureSource,
    #[serde(rename = "providerEventName")]
    pub provider_event_name: String,
    #[serde(rename = "observedAt")]
    pub observed_at: DateTime<Utc>,
}

impl SessionPromptRecord {
    pub fn new(
        text: Option<String>,
        confidence: Confidence,
        capture_source: CaptureSource,
        provider_event_name: impl Into<String>,
        observed_at: DateTime<Utc>,
        payload_canonical: &str,
    ) -> Self {
        let provider_event_name = provider_event_name.into();
        let hash = harness_core::json::sha256_digest(&[
            &provider_event_name,
            text.as_deref().unwrap_or(""),
            payload_canonical,
        ]);
        Self { text, hash, confidence, capture_source, provider_event_name, observed_at }
    }
}
