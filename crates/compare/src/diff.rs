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

use crate::path::DiffPath;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use strum::{Display as StrumDisplay, EnumString};

/// Classification of a single difference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, StrumDisplay, EnumString, Serialize)]
pub enum DiffKind {
    #[strum(serialize = "changed")]
    #[serde(rename = "changed")]
    ValueChanged,
    #[strum(serialize = "type_mismatch")]
    #[serde(rename = "type_mismatch")]
    TypeMismatch,
    /// Present in the expected database, absent from the actual one.
    #[strum(serialize = "missing")]
    #[serde(rename = "missing")]
    Missing,
    /// Present in the actual database, absent from the expected one.
    #[strum(serialize = "extra")]
    #[serde(rename = "extra")]
    Extra,
    #[strum(serialize = "length_mismatch")]
    #[serde(rename = "length_mismatch")]
    LengthMismatch,
}

/// A difference between two databases at one path.
///
/// Both sides are kept in their printed form. `None` means the side has nothing at that path: a
/// missing or extra element, or an absent verb program.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub path: DiffPath,
    pub kind: DiffKind,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl Diff {
    pub fn new(
        path: DiffPath,
        kind: DiffKind,
        expected: Option<String>,
        actual: Option<String>,
    ) -> Self {
        Self {
            path,
            kind,
            expected,
            actual,
        }
    }
}

fn side(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("<absent>")
}

impl Display for Diff {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (expected, actual) = (side(&self.expected), side(&self.actual));
        match self.kind {
            DiffKind::ValueChanged => write!(f, "{}: {expected} -> {actual}", self.path),
            DiffKind::TypeMismatch => write!(f, "{}: type {expected} -> {actual}", self.path),
            DiffKind::Missing => write!(f, "{}: MISSING (expected {expected})", self.path),
            DiffKind::Extra => write!(f, "{}: EXTRA (got {actual})", self.path),
            DiffKind::LengthMismatch => write!(f, "{}: length {expected} -> {actual}", self.path),
        }
    }
}
