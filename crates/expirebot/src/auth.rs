// Expirebot
// Copyright (C) 2025 Throneless Tech

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use expirebot_common::error::{ExpirebotError, Result};
use crate::matrix::MessagingService;

/// A user's power level against the level a room requires for redactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Authorization {
    pub required: i64,
    pub actual: i64,
}

impl Authorization {
    pub fn permitted(&self) -> bool {
        self.actual >= self.required
    }
}

pub async fn authorize(
    messaging: &dyn MessagingService,
    room_id: &str,
    user_id: &str,
) -> Result<Authorization> {
    let levels = messaging.get_room_power_levels(room_id).await?;
    Ok(Authorization {
        required: levels.redaction_level(),
        actual: levels.user_level(user_id),
    })
}

/// Fails with `PermissionDenied` unless `user_id` may redact in `room_id`.
/// Any other error means the power levels could not be read, and callers
/// must not treat it as permission.
pub async fn require_redact_rights(
    messaging: &dyn MessagingService,
    room_id: &str,
    user_id: &str,
) -> Result<()> {
    let auth = authorize(messaging, room_id, user_id).await?;
    if auth.permitted() {
        Ok(())
    } else {
        Err(ExpirebotError::PermissionDenied {
            required: auth.required,
            actual: auth.actual,
        })
    }
}
