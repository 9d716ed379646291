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

//! The set of value types that can be stored in a LambdaMOO / ToastStunt textdump.

mod error;
mod float;
mod obj;
#[allow(clippy::module_inception)]
mod var;

pub use error::{ERROR_NAMES, error_name};
pub use float::{FLOAT_DIGITS, floats_close, format_float};
pub use obj::{NOTHING, Objid};
pub use var::{
    Var, WaifRef, v_anon, v_bool, v_catch, v_clear, v_empty_list, v_empty_map, v_err, v_finally,
    v_float, v_int, v_list, v_map, v_none, v_obj, v_str, v_waif,
};

use strum::{Display, FromRepr};

/// Integer encoding of values as represented in a textdump. These are on-disk constants and must
/// never change.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, FromRepr, Display)]
#[allow(non_camel_case_types)]
pub enum VarType {
    TYPE_INT = 0,
    TYPE_OBJ = 1,
    TYPE_STR = 2,
    TYPE_ERR = 3,
    TYPE_LIST = 4,
    TYPE_CLEAR = 5,
    TYPE_NONE = 6,
    TYPE_CATCH = 7,
    TYPE_FINALLY = 8,
    TYPE_FLOAT = 9,
    TYPE_MAP = 10,
    // 11 was ToastStunt's map iterator, which is never persisted.
    TYPE_ANON = 12,
    TYPE_WAIF = 13,
    TYPE_BOOL = 14,
}

impl VarType {
    /// Map a tag as read from disk. Anything outside the table (including 11) is `None`.
    pub fn from_tag(tag: i64) -> Option<Self> {
        u8::try_from(tag).ok().and_then(VarType::from_repr)
    }

    pub fn tag(&self) -> i64 {
        *self as u8 as i64
    }
}
