//! Typed permission codes.
//!
//! On the wire a user's permissions are a string of single-character codes
//! (`"bce"`). Inside the client they are [`Permission`] values; the character
//! encoding only exists at the serde boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    /// `a`: full access, bypasses every other check.
    SysAdmin,
    /// `b`: administrative rights.
    Admin,
    /// `c`: may edit user records.
    UserEditor,
    /// `e`: may change an order's payment status.
    PaymentEditor,
    /// `g`: may change an order's kitchen status.
    KitchenEditor,
    /// A code this client has no name for. Still compared by code.
    Other(char),
}

impl Permission {
    pub const FULL_ACCESS: Permission = Permission::SysAdmin;

    pub fn from_code(code: char) -> Self {
        match code {
            'a' => Permission::SysAdmin,
            'b' => Permission::Admin,
            'c' => Permission::UserEditor,
            'e' => Permission::PaymentEditor,
            'g' => Permission::KitchenEditor,
            other => Permission::Other(other),
        }
    }

    pub fn code(&self) -> char {
        match self {
            Permission::SysAdmin => 'a',
            Permission::Admin => 'b',
            Permission::UserEditor => 'c',
            Permission::PaymentEditor => 'e',
            Permission::KitchenEditor => 'g',
            Permission::Other(code) => *code,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Permission::SysAdmin => "System administrator: full access to every resource",
            Permission::Admin => "Administrator: administrative rights",
            Permission::UserEditor => "User editor: may edit user records",
            Permission::PaymentEditor => "Payment editor: may change order payment status",
            Permission::KitchenEditor => "Kitchen editor: may change order kitchen status",
            Permission::Other(_) => "Unknown permission",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// An ordered, duplicate-free set of permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(Vec<Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a code string. Whitespace is ignored, duplicates collapse.
    pub fn from_codes(codes: &str) -> Self {
        codes
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(Permission::from_code)
            .collect()
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn codes(&self) -> String {
        self.0.iter().map(Permission::code).collect()
    }

    /// Does this set satisfy `required`?
    ///
    /// The full-access permission always satisfies. Otherwise `full_match`
    /// requires every permission in `required` (an empty requirement is
    /// satisfied) and any-match requires at least one (an empty requirement
    /// is not).
    pub fn satisfies(&self, required: &PermissionSet, full_match: bool) -> bool {
        if self.contains(Permission::FULL_ACCESS) {
            return true;
        }
        if full_match {
            required.iter().all(|p| self.contains(*p))
        } else {
            required.iter().any(|p| self.contains(*p))
        }
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut set = Vec::new();
        for permission in iter {
            if !set.contains(&permission) {
                set.push(permission);
            }
        }
        PermissionSet(set)
    }
}

impl FromStr for PermissionSet {
    type Err = std::convert::Infallible;

    fn from_str(codes: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_codes(codes))
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.codes())
    }
}

impl Serialize for PermissionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.codes())
    }
}

impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // `null` shows up in older records; treat it as "no permissions".
        let codes = Option::<String>::deserialize(deserializer)?;
        Ok(codes.map(|c| Self::from_codes(&c)).unwrap_or_default())
    }
}
