/**
 * Decency anti-spam content filter
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
**/
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use decency_common::session::MessageSession;
use decency_config::log_channel::FILTER;

/// header the policy server stores its scoring snapshot in.
pub const SCORING_HEADER: &str = "X-Decency-Scoring";
/// header carrying the RSA signature over the decoded scoring payload.
pub const SIGNATURE_HEADER: &str = "X-Decency-Scoring-Signature";

/// what the policy server signed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ScoringPayload {
    /// score accumulated during the SMTP stage.
    pub score: i64,
    /// per-module contribution strings.
    pub details: Vec<String>,
}

/// Verifies the scoring handshake header injected by the policy server.
///
/// Anyone can inject a header; only a payload whose signature checks out
/// against the policy server's public key is merged into the session. Both
/// headers are always stripped so downstream hops never see a replayable
/// scoring claim.
pub struct PolicyScoringVerifier {
    public_key: ring::signature::UnparsedPublicKey<Vec<u8>>,
}

impl PolicyScoringVerifier {
    /// wrap a PKCS#1 DER encoded RSA public key.
    #[must_use]
    pub fn new(public_key_der: Vec<u8>) -> Self {
        Self {
            public_key: ring::signature::UnparsedPublicKey::new(
                &ring::signature::RSA_PKCS1_2048_8192_SHA256,
                public_key_der,
            ),
        }
    }

    /// load the key the policy server signs with.
    ///
    /// # Errors
    ///
    /// * the key file cannot be read
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        Ok(Self::new(std::fs::read(path).with_context(|| {
            format!("cannot read verify key {}", path.display())
        })?))
    }

    /// pull the scoring headers off the message and merge the payload when
    /// the signature verifies. returns whether a payload was accepted.
    ///
    /// # Errors
    ///
    /// * the spool file cannot be read
    pub fn verify_and_merge(&self, session: &mut MessageSession) -> anyhow::Result<bool> {
        let mail = session.mail()?;
        let payload_b64 = mail.get_header(SCORING_HEADER).map(str::to_string);
        let signature_b64 = mail.get_header(SIGNATURE_HEADER).map(str::to_string);
        mail.remove_header(SCORING_HEADER);
        mail.remove_header(SIGNATURE_HEADER);

        let (payload_b64, signature_b64) = match (payload_b64, signature_b64) {
            (Some(payload), Some(signature)) => (payload, signature),
            (Some(_), None) => {
                log::error!(
                    target: FILTER,
                    "message '{}': scoring header without signature, dropped",
                    session.id
                );
                return Ok(false);
            }
            (None, _) => return Ok(false),
        };

        let payload = match STANDARD.decode(payload_b64.trim()) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!(
                    target: FILTER,
                    "message '{}': undecodable scoring payload: {}",
                    session.id,
                    e
                );
                return Ok(false);
            }
        };
        let signature = match STANDARD.decode(signature_b64.trim()) {
            Ok(signature) => signature,
            Err(e) => {
                log::warn!(
                    target: FILTER,
                    "message '{}': undecodable scoring signature: {}",
                    session.id,
                    e
                );
                return Ok(false);
            }
        };

        if self.public_key.verify(&payload, &signature).is_err() {
            log::warn!(
                target: FILTER,
                "message '{}': scoring signature does not verify, payload ignored",
                session.id
            );
            return Ok(false);
        }

        let payload = serde_json::from_slice::<ScoringPayload>(&payload)
            .context("signed scoring payload is not valid json")?;

        log::debug!(
            target: FILTER,
            "message '{}': inheriting policy score {}",
            session.id,
            payload.score
        );
        session.spam_score += payload.score;
        session.spam_details.extend(payload.details);
        session
            .flags
            .insert(decency_common::session::FLAG_POLICY_SCORED.to_string());
        Ok(true)
    }
}
