// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use super::uploader::UploadResult;

/// What the upload worker should do next with a ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Send (or resend) the request.
    Upload,
    /// Back off for the given duration, then upload.
    Wait(Duration),
    /// Stop processing this ping.
    Done,
}

/// Retry, backoff and throttling knobs of the upload worker.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Recoverable failures tolerated per ping before it is dropped.
    pub max_recoverable_failures: u32,
    /// Consecutive throttle waits tolerated before the worker yields.
    pub max_wait_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Rate limit: at most this many pings per `interval`.
    pub max_pings_per_interval: u32,
    pub interval: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_recoverable_failures: 3,
            max_wait_attempts: 3,
            backoff_base: Duration::from_secs(15),
            backoff_cap: Duration::from_secs(120),
            max_pings_per_interval: 40,
            interval: Duration::from_secs(60),
        }
    }
}

impl UploadPolicy {
    /// Exponential backoff for the given (1-based) failure count, capped.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }

    /// The policy function: given the attempts made so far and the last
    /// result, what happens next.
    pub fn next_action(&self, attempts: u32, last_result: Option<UploadResult>) -> NextAction {
        match last_result {
            None => NextAction::Upload,
            Some(UploadResult::Success) | Some(UploadResult::UnrecoverableFailure) => {
                NextAction::Done
            }
            Some(UploadResult::HttpStatus(code)) if !(500..600).contains(&code) => {
                NextAction::Done
            }
            Some(UploadResult::HttpStatus(_)) | Some(UploadResult::RecoverableFailure) => {
                if attempts > self.max_recoverable_failures {
                    NextAction::Done
                } else {
                    NextAction::Wait(self.backoff(attempts))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially_and_caps() {
        let policy = UploadPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(15));
        assert_eq!(policy.backoff(2), Duration::from_secs(30));
        assert_eq!(policy.backoff(3), Duration::from_secs(60));
        assert_eq!(policy.backoff(4), Duration::from_secs(120));
        assert_eq!(policy.backoff(10), Duration::from_secs(120));
    }

    #[test]
    fn test_first_attempt_uploads() {
        let policy = UploadPolicy::default();
        assert_eq!(policy.next_action(0, None), NextAction::Upload);
    }

    #[test]
    fn test_terminal_results() {
        let policy = UploadPolicy::default();
        assert_eq!(
            policy.next_action(1, Some(UploadResult::Success)),
            NextAction::Done
        );
        assert_eq!(
            policy.next_action(1, Some(UploadResult::HttpStatus(400))),
            NextAction::Done
        );
        assert_eq!(
            policy.next_action(1, Some(UploadResult::UnrecoverableFailure)),
            NextAction::Done
        );
    }

    #[test]
    fn test_recoverable_results_wait_then_give_up() {
        let policy = UploadPolicy::default();
        assert_eq!(
            policy.next_action(1, Some(UploadResult::HttpStatus(503))),
            NextAction::Wait(Duration::from_secs(15))
        );
        assert_eq!(
            policy.next_action(2, Some(UploadResult::RecoverableFailure)),
            NextAction::Wait(Duration::from_secs(30))
        );
        // The third failure still earns a retry; the fourth does not.
        assert_eq!(
            policy.next_action(3, Some(UploadResult::HttpStatus(500))),
            NextAction::Wait(Duration::from_secs(60))
        );
        assert_eq!(
            policy.next_action(4, Some(UploadResult::HttpStatus(500))),
            NextAction::Done
        );
    }
}
