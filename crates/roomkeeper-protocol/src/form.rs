//! Room-configuration forms.
//!
//! After creating a room the broker asks the service for its
//! configuration form, fills in the fields it cares about and submits it
//! back. Fields the broker doesn't know are submitted unchanged.

/// Well-known field names (XEP-0045 `muc#roomconfig` plus a few
/// server-specific extras).
pub mod fields {
    pub const ROOM_NAME: &str = "muc#roomconfig_roomname";
    pub const PERSISTENT: &str = "muc#roomconfig_persistentroom";
    pub const PUBLIC: &str = "muc#roomconfig_publicroom";
    pub const PUBLIC_LIST: &str = "public_list";
    pub const PASSWORD_PROTECTED: &str = "muc#roomconfig_passwordprotectedroom";
    pub const ROOM_SECRET: &str = "muc#roomconfig_roomsecret";
    pub const MAX_USERS: &str = "muc#roomconfig_maxusers";
    pub const WHOIS: &str = "muc#roomconfig_whois";
    pub const MEMBERS_ONLY: &str = "muc#roomconfig_membersonly";
    pub const MODERATED: &str = "muc#roomconfig_moderatedroom";
    pub const MEMBERS_BY_DEFAULT: &str = "members_by_default";
    pub const CHANGE_SUBJECT: &str = "muc#roomconfig_changesubject";
    pub const ALLOW_INVITES: &str = "muc#roomconfig_allowinvites";
    pub const ALLOW_PRIVATE_MESSAGES: &str = "allow_private_messages";
    pub const ALLOW_QUERY_USERS: &str = "allow_query_users";
}

/// Value of a form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    Text(String),
}

impl FieldValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Bool(_) => None,
        }
    }
}

/// One field of a configuration form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: FieldValue,
    /// Values the service offers for list fields (empty otherwise).
    pub options: Vec<String>,
}

impl FormField {
    pub fn boolean(name: &str, value: bool) -> Self {
        Self { name: name.to_string(), value: FieldValue::Bool(value), options: Vec::new() }
    }

    pub fn text(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: FieldValue::Text(value.to_string()),
            options: Vec::new(),
        }
    }

    pub fn list(name: &str, value: &str, options: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            value: FieldValue::Text(value.to_string()),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }
}

/// A configuration form as offered by (and submitted to) the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigForm {
    pub fields: Vec<FormField>,
}

impl ConfigForm {
    pub fn new(fields: Vec<FormField>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FormField> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Current value of a boolean field.
    pub fn bool_value(&self, name: &str) -> Option<bool> {
        self.field(name).and_then(|f| f.value.as_bool())
    }

    /// Current value of a text or list field.
    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(|f| f.value.as_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_lookup_and_mutation() {
        let mut form = ConfigForm::new(vec![
            FormField::boolean(fields::PUBLIC, true),
            FormField::list(fields::MAX_USERS, "20", &["5", "10", "20"]),
        ]);

        assert_eq!(form.bool_value(fields::PUBLIC), Some(true));
        assert_eq!(form.text_value(fields::MAX_USERS), Some("20"));
        assert_eq!(form.field(fields::MAX_USERS).unwrap().options.len(), 3);
        assert!(form.field(fields::WHOIS).is_none());

        form.field_mut(fields::PUBLIC).unwrap().value = FieldValue::Bool(false);
        assert_eq!(form.bool_value(fields::PUBLIC), Some(false));
    }

    #[test]
    fn test_value_accessors_reject_wrong_kind() {
        assert_eq!(FieldValue::Bool(true).as_text(), None);
        assert_eq!(FieldValue::Text("x".into()).as_bool(), None);
    }
}
