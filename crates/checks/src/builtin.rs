// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of AccountFlow.
//
// AccountFlow is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// AccountFlow is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with AccountFlow. If not, see <https://www.gnu.org/licenses/>.

//! Built-in check rules.
//!
//! - `CHECK_NAME`: a name containing `UNPROCESSABLE_DATA` cannot be checked;
//!   otherwise it is flagged when it contains "evil" (case-sensitive)
//! - `CHECK_ADDRESS`: flagged unless it contains a house number next to a
//!   word, either `<digits> <word>` or `<word> <digits>`

use crate::{CheckError, CheckEvaluator, CheckKind};
use async_trait::async_trait;

const UNPROCESSABLE_MARKER: &str = "UNPROCESSABLE_DATA";

/// Default business rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEvaluator;

impl BuiltinEvaluator {
    pub fn check_name(name: &str) -> Result<bool, CheckError> {
        if name.contains(UNPROCESSABLE_MARKER) {
            return Err(CheckError::malformed(format!(
                "Simulated error: Name '{}' is not possible to check.",
                name
            )));
        }
        Ok(name.contains("evil"))
    }

    pub fn check_address(address: &str) -> Result<bool, CheckError> {
        Ok(!has_street_number(address))
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A single space with word characters on both sides, at least one a digit.
fn has_street_number(address: &str) -> bool {
    let chars: Vec<char> = address.chars().collect();
    chars.windows(3).any(|w| {
        w[1] == ' '
            && is_word_char(w[0])
            && is_word_char(w[2])
            && (w[0].is_ascii_digit() || w[2].is_ascii_digit())
    })
}

#[async_trait]
impl CheckEvaluator for BuiltinEvaluator {
    async fn evaluate(&self, check: CheckKind, input: &str) -> Result<bool, CheckError> {
        match check {
            CheckKind::Name => Self::check_name(input),
            CheckKind::Address => Self::check_address(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_rules() {
        assert_eq!(BuiltinEvaluator::check_name("Alice"), Ok(false));
        assert_eq!(BuiltinEvaluator::check_name("evil Bob"), Ok(true));
        assert_eq!(BuiltinEvaluator::check_name("Dr. evil"), Ok(true));
        // Only the lowercase marker counts
        assert_eq!(BuiltinEvaluator::check_name("Dr. EVIL"), Ok(false));
        assert_eq!(BuiltinEvaluator::check_name("Evil Eve"), Ok(false));

        let err = BuiltinEvaluator::check_name("UNPROCESSABLE_DATA Carol").unwrap_err();
        assert_eq!(
            err,
            CheckError::malformed(
                "Simulated error: Name 'UNPROCESSABLE_DATA Carol' is not possible to check."
            )
        );
    }

    #[test]
    fn test_address_rules() {
        assert_eq!(BuiltinEvaluator::check_address("123 Main St"), Ok(false));
        assert_eq!(BuiltinEvaluator::check_address("Hauptstrasse 5"), Ok(false));
        assert_eq!(BuiltinEvaluator::check_address("Apt4 B"), Ok(false));
        assert_eq!(BuiltinEvaluator::check_address("Main St"), Ok(true));
        assert_eq!(BuiltinEvaluator::check_address("123"), Ok(true));
        assert_eq!(BuiltinEvaluator::check_address(""), Ok(true));
        assert_eq!(BuiltinEvaluator::check_address("12  Main"), Ok(true));
    }

    #[tokio::test]
    async fn test_evaluate_dispatches_by_kind() {
        let evaluator = BuiltinEvaluator;
        assert_eq!(evaluator.evaluate(CheckKind::Name, "Alice").await, Ok(false));
        assert_eq!(evaluator.evaluate(CheckKind::Address, "Main St").await, Ok(true));
    }
}
