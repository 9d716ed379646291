// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::fmt::{Display, Formatter};

/// Used throughout to refer to a missing object value.
pub const NOTHING: Objid = Objid(-1);

/// A database object number. On disk this is a bare integer; whether it is *typed* as an object
/// depends on where it appears.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Objid(pub i64);

impl Objid {
    /// Negative numbers are the well known "no object" sentinels, never real slots.
    pub fn is_sentinel(&self) -> bool {
        self.0 < 0
    }
}

impl Display for Objid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<i64> for Objid {
    fn from(id: i64) -> Self {
        Self(id)
    }
}
