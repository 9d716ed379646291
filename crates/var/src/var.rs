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

use crate::{Objid, VarType, error_name, format_float};
use std::fmt::{Display, Formatter};

/// Index of a waif in the database's waif table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct WaifRef(pub usize);

/// A textdump value.
///
/// Several variants carry a plain integer payload (`Obj`, `Err`, `Catch`, `Finally`, `Anon`). They
/// are distinct because the type tag written before them differs, and the tag is the only thing
/// that tells them apart once they are on disk.
#[derive(Clone, Debug, PartialEq)]
pub enum Var {
    Int(i64),
    Bool(bool),
    Float(f64),
    Str(String),
    Obj(Objid),
    Err(i64),
    /// `_CATCH` marker, only seen on the value stacks of suspended tasks.
    Catch(i64),
    /// `_FINALLY` marker, only seen on the value stacks of suspended tasks.
    Finally(i64),
    List(Vec<Var>),
    /// Association list, kept in the order it was read.
    Map(Vec<(Var, Var)>),
    Anon(i64),
    Waif(WaifRef),
    /// A property value that is inherited from the parent ("clear").
    Clear,
    None,
}

impl Var {
    pub fn type_tag(&self) -> VarType {
        match self {
            Var::Int(_) => VarType::TYPE_INT,
            Var::Bool(_) => VarType::TYPE_BOOL,
            Var::Float(_) => VarType::TYPE_FLOAT,
            Var::Str(_) => VarType::TYPE_STR,
            Var::Obj(_) => VarType::TYPE_OBJ,
            Var::Err(_) => VarType::TYPE_ERR,
            Var::Catch(_) => VarType::TYPE_CATCH,
            Var::Finally(_) => VarType::TYPE_FINALLY,
            Var::List(_) => VarType::TYPE_LIST,
            Var::Map(_) => VarType::TYPE_MAP,
            Var::Anon(_) => VarType::TYPE_ANON,
            Var::Waif(_) => VarType::TYPE_WAIF,
            Var::Clear => VarType::TYPE_CLEAR,
            Var::None => VarType::TYPE_NONE,
        }
    }

    /// Short name of the variant, used when reporting type mismatches and for ordering map keys.
    pub fn type_name(&self) -> &'static str {
        match self {
            Var::Int(_) => "int",
            Var::Bool(_) => "bool",
            Var::Float(_) => "float",
            Var::Str(_) => "str",
            Var::Obj(_) => "obj",
            Var::Err(_) => "err",
            Var::Catch(_) => "catch",
            Var::Finally(_) => "finally",
            Var::List(_) => "list",
            Var::Map(_) => "map",
            Var::Anon(_) => "anon",
            Var::Waif(_) => "waif",
            Var::Clear => "clear",
            Var::None => "none",
        }
    }

}

impl Display for Var {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Var::Int(i) => write!(f, "{i}"),
            Var::Bool(b) => write!(f, "{b}"),
            Var::Float(fl) => write!(f, "{}", format_float(*fl)),
            Var::Str(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' | '\\' => write!(f, "\\{c}")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Var::Obj(o) => write!(f, "{o}"),
            Var::Err(e) => match error_name(*e) {
                Some(name) => write!(f, "{name}"),
                None => write!(f, "E_#{e}"),
            },
            Var::Catch(c) => write!(f, "_CATCH({c})"),
            Var::Finally(c) => write!(f, "_FINALLY({c})"),
            Var::List(l) => {
                write!(f, "{{")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")
            }
            Var::Map(m) => {
                write!(f, "[")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} -> {v}")?;
                }
                write!(f, "]")
            }
            Var::Anon(a) => write!(f, "*anonymous*#{a}"),
            Var::Waif(w) => write!(f, "<waif {}>", w.0),
            Var::Clear => write!(f, "clear"),
            Var::None => write!(f, "none"),
        }
    }
}

pub fn v_int(i: i64) -> Var {
    Var::Int(i)
}

pub fn v_bool(b: bool) -> Var {
    Var::Bool(b)
}

pub fn v_float(f: f64) -> Var {
    Var::Float(f)
}

pub fn v_str(s: &str) -> Var {
    Var::Str(s.to_string())
}

pub fn v_obj(id: i64) -> Var {
    Var::Obj(Objid(id))
}

pub fn v_err(code: i64) -> Var {
    Var::Err(code)
}

pub fn v_catch(n: i64) -> Var {
    Var::Catch(n)
}

pub fn v_finally(n: i64) -> Var {
    Var::Finally(n)
}

pub fn v_list(l: &[Var]) -> Var {
    Var::List(l.to_vec())
}

pub fn v_empty_list() -> Var {
    Var::List(vec![])
}

pub fn v_map(pairs: &[(Var, Var)]) -> Var {
    Var::Map(pairs.to_vec())
}

pub fn v_empty_map() -> Var {
    Var::Map(vec![])
}

pub fn v_anon(id: i64) -> Var {
    Var::Anon(id)
}

pub fn v_waif(index: usize) -> Var {
    Var::Waif(WaifRef(index))
}

pub fn v_clear() -> Var {
    Var::Clear
}

pub fn v_none() -> Var {
    Var::None
}
