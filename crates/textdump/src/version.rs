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

use moodb_var::VarType;
use strum::{Display, FromRepr};

const BANNER_PREFIX: &str = "** LambdaMOO Database, Format Version ";
const BANNER_SUFFIX: &str = " **";

/// Database format versions, as numbered by LambdaMOO (0-4) and ToastStunt (5 onward).
#[repr(u16)]
#[derive(Debug, Eq, PartialEq, Display, Ord, PartialOrd, Copy, Clone, FromRepr, Hash)]
pub enum DbVersion {
    DbvPrehistory = 0,
    /// `try` / `except` / `finally`, and with them the CATCH and FINALLY markers.
    DbvExceptions = 1,
    DbvBreakCont = 2,
    /// FLOAT values, and a language version line on each suspended frame.
    DbvFloat = 3,
    DbvBfbugFixed = 4,
    /// ToastStunt's object layout: typed location/contents/parents/children, no linked lists.
    DbvNextGen = 5,
    DbvTaskLocal = 6,
    DbvMap = 7,
    DbvFileIo = 8,
    DbvExec = 9,
    DbvInterrupt = 10,
    DbvThis = 11,
    DbvIter = 12,
    DbvAnon = 13,
    DbvWaif = 14,
    DbvLastMove = 15,
    DbvThreaded = 16,
    DbvBool = 17,
}

/// Everything written by this crate uses this version, regardless of what was read.
pub const CURRENT_VERSION: DbVersion = DbVersion::DbvBool;

impl DbVersion {
    pub fn number(&self) -> u16 {
        *self as u16
    }

    /// Parse a version banner line, e.g. `** LambdaMOO Database, Format Version 17 **`.
    pub fn parse(banner: &str) -> Option<DbVersion> {
        let number = banner
            .trim_end()
            .strip_prefix(BANNER_PREFIX)?
            .strip_suffix(BANNER_SUFFIX)?;
        DbVersion::from_repr(number.trim().parse::<u16>().ok()?)
    }

    pub fn banner(&self) -> String {
        format!("{BANNER_PREFIX}{}{BANNER_SUFFIX}", self.number())
    }

    pub fn has_exceptions(&self) -> bool {
        *self >= DbVersion::DbvExceptions
    }

    pub fn has_language_version(&self) -> bool {
        *self >= DbVersion::DbvFloat
    }

    pub fn is_next_gen(&self) -> bool {
        *self >= DbVersion::DbvNextGen
    }

    pub fn has_task_local(&self) -> bool {
        *self >= DbVersion::DbvTaskLocal
    }

    pub fn has_maps(&self) -> bool {
        *self >= DbVersion::DbvMap
    }

    pub fn has_interrupted_tasks(&self) -> bool {
        *self >= DbVersion::DbvInterrupt
    }

    pub fn has_activation_this(&self) -> bool {
        *self >= DbVersion::DbvThis
    }

    /// Anonymous objects: the ANON tag, the anonymous object batches and the activation `vloc`
    /// slot all arrived together.
    pub fn has_anon(&self) -> bool {
        *self >= DbVersion::DbvAnon
    }

    pub fn has_waifs(&self) -> bool {
        *self >= DbVersion::DbvWaif
    }

    pub fn has_last_move(&self) -> bool {
        *self >= DbVersion::DbvLastMove
    }

    pub fn has_threaded(&self) -> bool {
        *self >= DbVersion::DbvThreaded
    }

    pub fn has_bool(&self) -> bool {
        *self >= DbVersion::DbvBool
    }

    /// Whether a value of this type may legally appear in a database of this version.
    pub fn allows(&self, vtype: VarType) -> bool {
        match vtype {
            VarType::TYPE_INT
            | VarType::TYPE_OBJ
            | VarType::TYPE_STR
            | VarType::TYPE_ERR
            | VarType::TYPE_LIST
            | VarType::TYPE_CLEAR
            | VarType::TYPE_NONE => true,
            VarType::TYPE_CATCH | VarType::TYPE_FINALLY => self.has_exceptions(),
            VarType::TYPE_FLOAT => self.has_language_version(),
            VarType::TYPE_MAP => self.has_maps(),
            VarType::TYPE_ANON => self.has_anon(),
            VarType::TYPE_WAIF => self.has_waifs(),
            VarType::TYPE_BOOL => self.has_bool(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CURRENT_VERSION, DbVersion};
    use moodb_var::VarType;
    use test_case::test_case;

    #[test]
    fn parse_lambda_banner() {
        assert_eq!(
            DbVersion::parse("** LambdaMOO Database, Format Version 4 **"),
            Some(DbVersion::DbvBfbugFixed)
        );
    }

    #[test]
    fn banner_round_trips() {
        let banner = CURRENT_VERSION.banner();
        assert_eq!(banner, "** LambdaMOO Database, Format Version 17 **");
        assert_eq!(DbVersion::parse(&banner), Some(CURRENT_VERSION));
    }

    #[test_case("** LambdaMOO Database, Format Version 18 **"; "unknown number")]
    #[test_case("** LambdaMOO Database, Format Version x **"; "not a number")]
    #[test_case("Moor 0.1.0, features: \"\", encoding: UTF8"; "foreign banner")]
    #[test_case(""; "empty")]
    fn rejects_bad_banners(banner: &str) {
        assert_eq!(DbVersion::parse(banner), None);
    }

    #[test_case(DbVersion::DbvPrehistory, VarType::TYPE_CATCH, false)]
    #[test_case(DbVersion::DbvExceptions, VarType::TYPE_CATCH, true)]
    #[test_case(DbVersion::DbvBreakCont, VarType::TYPE_FLOAT, false)]
    #[test_case(DbVersion::DbvFloat, VarType::TYPE_FLOAT, true)]
    #[test_case(DbVersion::DbvTaskLocal, VarType::TYPE_MAP, false)]
    #[test_case(DbVersion::DbvMap, VarType::TYPE_MAP, true)]
    #[test_case(DbVersion::DbvIter, VarType::TYPE_ANON, false)]
    #[test_case(DbVersion::DbvAnon, VarType::TYPE_WAIF, false)]
    #[test_case(DbVersion::DbvWaif, VarType::TYPE_WAIF, true)]
    #[test_case(DbVersion::DbvThreaded, VarType::TYPE_BOOL, false)]
    #[test_case(DbVersion::DbvBool, VarType::TYPE_BOOL, true)]
    fn type_gating(version: DbVersion, vtype: VarType, allowed: bool) {
        assert_eq!(version.allows(vtype), allowed);
    }
}
