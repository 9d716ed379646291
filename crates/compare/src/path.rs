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

use serde::{Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// One step into a database structure.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A named field, a property name or a string map key.
    Name(String),
    /// A position in a sequence.
    Index(usize),
    /// A non-string map key, held as its literal form.
    Key(String),
}

/// Where in a database a difference was found, e.g. `#5.verbs[0].code[2]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DiffPath {
    segments: Vec<Segment>,
}

impl DiffPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// A path starting at a database object, rendered `#<id>`.
    pub fn object(id: i64) -> Self {
        Self {
            segments: vec![Segment::Name(format!("#{id}"))],
        }
    }

    pub fn name(&self, name: &str) -> Self {
        self.child(Segment::Name(name.to_string()))
    }

    pub fn index(&self, index: usize) -> Self {
        self.child(Segment::Index(index))
    }

    pub fn key(&self, literal: String) -> Self {
        self.child(Segment::Key(literal))
    }

    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl Display for DiffPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Name(name) if i == 0 => write!(f, "{name}")?,
                Segment::Name(name) => write!(f, ".{name}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Key(literal) => write!(f, "[{literal}]")?,
            }
        }
        Ok(())
    }
}

impl Serialize for DiffPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::DiffPath;

    #[test]
    fn rendering() {
        assert_eq!(DiffPath::root().to_string(), "<root>");
        assert_eq!(
            DiffPath::object(5)
                .name("verbs")
                .index(0)
                .name("code")
                .index(2)
                .to_string(),
            "#5.verbs[0].code[2]"
        );
        assert_eq!(
            DiffPath::root()
                .name("waifs")
                .index(3)
                .name("props")
                .index(0)
                .to_string(),
            "waifs[3].props[0]"
        );
        assert_eq!(
            DiffPath::object(0)
                .name("config")
                .key("#12".into())
                .to_string(),
            "#0.config[#12]"
        );
    }

    #[test]
    fn children_do_not_alias() {
        let base = DiffPath::object(1).name("properties");
        let a = base.name("a");
        let b = base.name("b");
        assert_eq!(base.segments().len(), 2);
        assert_eq!(a.to_string(), "#1.properties.a");
        assert_eq!(b.to_string(), "#1.properties.b");
    }
}
