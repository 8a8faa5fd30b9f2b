// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Codec for the `vips` column of the OVN `load_balancer` table.
//!
//! `ovn-nbctl --data=bare get load_balancer <uuid> vips` renders the column as an
//! OVSDB map:
//!
//! ```text
//! {"10.96.0.10:53"="10.244.2.3:53,10.244.2.5:53", "[fd00:96::1]:80"="[2001:db8::1]:3456"}
//! ```
//!
//! Keys are VIPs, values are comma-separated backend lists. An empty map renders
//! as `{}`. Strings are normally quoted; bare atoms are accepted for robustness.

use crate::errors::VipParseError;
use crate::types::{EndpointSet, VipTable, VirtualIp};

/// Decode a `vips` column into a VIP table.
///
/// # Errors
///
/// Returns [`VipParseError`] on any syntax error. The caller decides what an
/// empty payload means; here it is simply malformed input.
pub fn parse_vips(input: &str) -> Result<VipTable, VipParseError> {
    let mut cursor = Cursor::new(input);
    let mut table = VipTable::new();

    cursor.skip_whitespace();
    cursor.expect('{')?;
    cursor.skip_whitespace();

    if !cursor.eat('}') {
        loop {
            cursor.skip_whitespace();
            let vip = cursor.atom()?;
            cursor.skip_whitespace();
            cursor.expect('=')?;
            cursor.skip_whitespace();
            let endpoints = cursor.atom()?;
            table.insert(VirtualIp::from_raw(vip), split_endpoints(&endpoints));

            cursor.skip_whitespace();
            if cursor.eat(',') {
                continue;
            }
            cursor.expect('}')?;
            break;
        }
    }

    cursor.skip_whitespace();
    cursor.expect_end()?;
    Ok(table)
}

/// Render a VIP table the way `ovn-nbctl` prints it.
#[must_use]
pub fn render_vips(table: &VipTable) -> String {
    let entries: Vec<String> = table
        .iter()
        .map(|(vip, endpoints)| format!("\"{vip}\"=\"{}\"", endpoints.join(",")))
        .collect();
    format!("{{{}}}", entries.join(", "))
}

/// `vips:"<vip>"="<ep1,ep2>"` argument of a full-replace `set` command.
#[must_use]
pub fn vip_assignment(vip: &VirtualIp, endpoints: &[String]) -> String {
    format!("vips:\"{vip}\"=\"{}\"", endpoints.join(","))
}

/// Split a backend list, dropping empty entries so `""` means no backends.
#[must_use]
pub fn split_endpoints(value: &str) -> EndpointSet {
    value
        .split(',')
        .map(str::trim)
        .filter(|ep| !ep.is_empty())
        .map(ToString::to_string)
        .collect()
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), VipParseError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}'")))
        }
    }

    fn expect_end(&self) -> Result<(), VipParseError> {
        if self.pos == self.input.len() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing data".to_string()))
        }
    }

    /// A quoted string (with backslash escapes) or a bare token.
    fn atom(&mut self) -> Result<String, VipParseError> {
        if self.eat('"') {
            let mut value = String::new();
            loop {
                match self.bump() {
                    Some('"') => return Ok(value),
                    Some('\\') => match self.bump() {
                        Some(c) => value.push(c),
                        None => return Err(self.error("unterminated escape".to_string())),
                    },
                    Some(c) => value.push(c),
                    None => return Err(self.error("unterminated string".to_string())),
                }
            }
        }

        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !matches!(c, '=' | ',' | '}' | '{' | '"') && !c.is_whitespace())
        {
            self.bump();
        }
        if self.pos == start {
            return Err(self.error("expected a string".to_string()));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn error(&self, reason: String) -> VipParseError {
        VipParseError {
            offset: self.pos,
            reason,
        }
    }
}

#[cfg(test)]
#[path = "vips_tests.rs"]
mod vips_tests;
