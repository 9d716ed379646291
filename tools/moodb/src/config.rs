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

use clap_derive::Args;
use eyre::eyre;
use figment::Figment;
use figment::providers::{Format, Serialized, Yaml};
use moodb_compare::CompareOptions;
use moodb_textdump::{EncodingMode, LineEnding, ReaderOptions, WaifIndexMode, WriterOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings that may live in a YAML file. Command line flags take precedence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub encoding: EncodingMode,
    pub waif_index_mode: WaifIndexMode,
    /// Line ending for written files; unset keeps the one the input used.
    pub line_ending: Option<LineEnding>,
    pub ignore_fields: Vec<String>,
    pub max_diffs: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct CodecArgs {
    #[arg(
        long,
        global = true,
        help = "String encoding of the textdump: latin1 (the default) or utf8"
    )]
    pub encoding: Option<EncodingMode>,

    #[arg(
        long,
        global = true,
        help = "How waifs are numbered on output: sequential (the default) or preserve"
    )]
    pub waif_index_mode: Option<WaifIndexMode>,

    #[arg(
        long,
        global = true,
        help = "Line ending for output: lf or crlf. Defaults to the input's"
    )]
    pub line_ending: Option<LineEnding>,
}

impl Config {
    /// Load the configuration file if we have it, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, eyre::Report> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        Self::extract(Yaml::file(path), &format!("{path:?}"))
    }

    fn extract(yaml: figment::providers::Data<Yaml>, source: &str) -> Result<Self, eyre::Report> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(yaml)
            .extract()
            .map_err(|e| eyre!("Failed to parse configuration from {source}: {e}"))
    }

    pub fn merge_args(&mut self, args: &CodecArgs) {
        if let Some(encoding) = args.encoding {
            self.encoding = encoding;
        }
        if let Some(mode) = args.waif_index_mode {
            self.waif_index_mode = mode;
        }
        if args.line_ending.is_some() {
            self.line_ending = args.line_ending;
        }
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            encoding: self.encoding,
        }
    }

    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            encoding: self.encoding,
            waif_index_mode: self.waif_index_mode,
            line_ending: self.line_ending,
        }
    }

    pub fn compare_options(&self) -> CompareOptions {
        CompareOptions {
            ignore_fields: self.ignore_fields.iter().cloned().collect(),
            max_diffs: self.max_diffs,
        }
    }
}
