//! Tenant schema metadata and permission rules
//!
//! Only tables and columns registered in tenant metadata are reachable
//! through the gateway. The flags here, combined with the caller's
//! [`KeyClass`], decide what a key may read and write.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::context::KeyClass;

/// Tables of one tenant schema, keyed by table name.
pub type TableMap = BTreeMap<String, TableMetadata>;

/// A registered column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    /// Withheld from public keys even when client-readable.
    pub is_sensitive: bool,
    pub client_readable: bool,
    pub client_writable: bool,
    /// Invisible to every key class.
    pub hidden: bool,
    /// Position in the table; drives wildcard expansion order.
    pub ordinal: i32,
}

impl ColumnMetadata {
    /// Column read rule.
    ///
    /// Hidden columns are unreadable for everyone. Server and admin keys read
    /// any other column; public keys need `client_readable` and not
    /// `is_sensitive`.
    pub fn can_read(&self, class: KeyClass) -> bool {
        if self.hidden {
            return false;
        }
        match class {
            KeyClass::Public => self.client_readable && !self.is_sensitive,
            KeyClass::Server | KeyClass::Admin => true,
        }
    }

    /// Column write rule.
    pub fn can_write(&self, class: KeyClass) -> bool {
        if self.hidden {
            return false;
        }
        match class {
            KeyClass::Public => self.client_writable,
            KeyClass::Server | KeyClass::Admin => true,
        }
    }
}

/// A registered table and its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    pub name: String,
    pub is_system: bool,
    pub client_readable: bool,
    pub client_writable: bool,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Table read rule: system tables are admin-only; client flags gate
    /// public keys.
    pub fn can_read(&self, class: KeyClass) -> bool {
        if self.is_system {
            return class == KeyClass::Admin;
        }
        match class {
            KeyClass::Public => self.client_readable,
            KeyClass::Server | KeyClass::Admin => true,
        }
    }

    pub fn can_write(&self, class: KeyClass) -> bool {
        if self.is_system {
            return class == KeyClass::Admin;
        }
        match class {
            KeyClass::Public => self.client_writable,
            KeyClass::Server | KeyClass::Admin => true,
        }
    }

    /// Columns `class` may read, in ordinal order.
    pub fn readable_columns(&self, class: KeyClass) -> Vec<&ColumnMetadata> {
        let mut columns: Vec<&ColumnMetadata> =
            self.columns.iter().filter(|c| c.can_read(class)).collect();
        columns.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.name.cmp(&b.name)));
        columns
    }

    /// Names of [`Self::readable_columns`].
    pub fn readable_column_names(&self, class: KeyClass) -> Vec<String> {
        self.readable_columns(class)
            .into_iter()
            .map(|c| c.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, ordinal: i32) -> ColumnMetadata {
        ColumnMetadata {
            name: name.to_string(),
            data_type: "text".to_string(),
            nullable: true,
            is_primary_key: false,
            is_sensitive: false,
            client_readable: true,
            client_writable: true,
            hidden: false,
            ordinal,
        }
    }

    fn table(columns: Vec<ColumnMetadata>) -> TableMetadata {
        TableMetadata {
            name: "profiles".to_string(),
            is_system: false,
            client_readable: true,
            client_writable: false,
            columns,
        }
    }

    #[test]
    fn test_sensitive_column_hidden_from_public_only() {
        let mut email = column("email", 2);
        email.is_sensitive = true;
        assert!(!email.can_read(KeyClass::Public));
        assert!(email.can_read(KeyClass::Server));
        assert!(email.can_read(KeyClass::Admin));
    }

    #[test]
    fn test_hidden_column_unreadable_for_all() {
        let mut secret = column("password_hash", 3);
        secret.hidden = true;
        for class in KeyClass::ALL {
            assert!(!secret.can_read(class));
            assert!(!secret.can_write(class));
        }
    }

    #[test]
    fn test_table_flags_gate_public_keys() {
        let t = table(vec![column("id", 1)]);
        assert!(t.can_read(KeyClass::Public));
        assert!(!t.can_write(KeyClass::Public));
        assert!(t.can_write(KeyClass::Server));
    }

    #[test]
    fn test_system_table_admin_only() {
        let mut t = table(vec![column("id", 1)]);
        t.is_system = true;
        assert!(!t.can_read(KeyClass::Public));
        assert!(!t.can_read(KeyClass::Server));
        assert!(t.can_read(KeyClass::Admin));
        assert!(t.can_write(KeyClass::Admin));
    }

    #[test]
    fn test_readable_columns_in_ordinal_order() {
        let mut email = column("email", 2);
        email.is_sensitive = true;
        let t = table(vec![column("name", 3), email, column("id", 1)]);

        assert_eq!(t.readable_column_names(KeyClass::Public), vec!["id", "name"]);
        assert_eq!(
            t.readable_column_names(KeyClass::Server),
            vec!["id", "email", "name"]
        );
    }
}
