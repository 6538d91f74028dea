//! How the broker fills in a new room's configuration form.

use roomkeeper_protocol::{ConfigForm, FieldValue, fields};

/// Site-dependent inputs to the configuration form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomPolicy {
    /// Human-readable room name.
    pub room_name: String,
    /// Password the room is protected with.
    pub password: String,
    /// Smallest acceptable occupant limit (the broker included).
    pub min_capacity: usize,
    /// Who may see occupants' real addresses (`moderators` or `anyone`).
    pub whois: String,
    pub allow_change_subject: bool,
}

/// Picks the smallest offered occupant limit that is at least `minimum`.
/// Options that aren't numbers are skipped.
pub fn select_capacity(options: &[String], minimum: usize) -> Option<usize> {
    options
        .iter()
        .filter_map(|o| match o.trim().parse::<usize>() {
            Ok(n) => Some(n),
            Err(_) => {
                tracing::warn!(option = %o, "capacity option is not a number");
                None
            }
        })
        .filter(|&n| n >= minimum)
        .min()
}

/// Returns the form to submit for `offered`. Fields the policy doesn't
/// cover are submitted unchanged.
pub fn fill_form(offered: &ConfigForm, policy: &RoomPolicy) -> ConfigForm {
    let mut form = offered.clone();
    for field in &mut form.fields {
        let value = match field.name.as_str() {
            fields::ALLOW_QUERY_USERS
            | fields::ALLOW_INVITES
            | fields::ALLOW_PRIVATE_MESSAGES
            | fields::PERSISTENT
            | fields::PUBLIC
            | fields::PUBLIC_LIST
            | fields::MEMBERS_ONLY
            | fields::MODERATED => FieldValue::Bool(false),
            fields::PASSWORD_PROTECTED | fields::MEMBERS_BY_DEFAULT => FieldValue::Bool(true),
            fields::ROOM_SECRET => FieldValue::Text(policy.password.clone()),
            fields::ROOM_NAME => FieldValue::Text(policy.room_name.clone()),
            fields::CHANGE_SUBJECT => FieldValue::Bool(policy.allow_change_subject),
            fields::MAX_USERS => match select_capacity(&field.options, policy.min_capacity) {
                Some(n) => FieldValue::Text(n.to_string()),
                None => {
                    tracing::warn!(
                        minimum = policy.min_capacity,
                        current = ?field.value,
                        "no usable occupant limit offered; keeping the server default"
                    );
                    continue;
                }
            },
            fields::WHOIS => {
                if field.options.iter().any(|o| o == &policy.whois) {
                    FieldValue::Text(policy.whois.clone())
                } else {
                    tracing::warn!(
                        whois = %policy.whois,
                        current = ?field.value,
                        "whois setting not offered by the server; keeping the server default"
                    );
                    continue;
                }
            }
            _ => continue,
        };
        field.value = value;
    }
    tracing::debug!(form = ?form, "configuration form filled");
    form
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomkeeper_protocol::FormField;

    fn policy() -> RoomPolicy {
        RoomPolicy {
            room_name: "helpdesk".into(),
            password: "s3cret".into(),
            min_capacity: 3,
            whois: "moderators".into(),
            allow_change_subject: true,
        }
    }

    fn offered() -> ConfigForm {
        ConfigForm::new(vec![
            FormField::text(fields::ROOM_NAME, ""),
            FormField::boolean(fields::PERSISTENT, true),
            FormField::boolean(fields::PUBLIC, true),
            FormField::boolean(fields::PASSWORD_PROTECTED, false),
            FormField::text(fields::ROOM_SECRET, ""),
            FormField::list(fields::MAX_USERS, "200", &["2", "5", "10", "200"]),
            FormField::list(fields::WHOIS, "anyone", &["moderators", "anyone"]),
            FormField::boolean(fields::MODERATED, true),
            FormField::boolean(fields::MEMBERS_BY_DEFAULT, false),
            FormField::boolean(fields::CHANGE_SUBJECT, false),
            FormField::boolean(fields::ALLOW_INVITES, true),
            FormField::text("x-unknown", "untouched"),
        ])
    }

    #[test]
    fn test_select_capacity_lowest_at_least_minimum() {
        let opts: Vec<String> = ["2", "5", "ten", "30", "100"].iter().map(|s| s.to_string()).collect();
        assert_eq!(select_capacity(&opts, 3), Some(5));
        assert_eq!(select_capacity(&opts, 30), Some(30));
        assert_eq!(select_capacity(&opts, 101), None);
        assert_eq!(select_capacity(&[], 3), None);
    }

    #[test]
    fn test_fill_form_applies_policy() {
        let form = fill_form(&offered(), &policy());

        assert_eq!(form.text_value(fields::ROOM_NAME), Some("helpdesk"));
        assert_eq!(form.bool_value(fields::PERSISTENT), Some(false));
        assert_eq!(form.bool_value(fields::PUBLIC), Some(false));
        assert_eq!(form.bool_value(fields::PASSWORD_PROTECTED), Some(true));
        assert_eq!(form.text_value(fields::ROOM_SECRET), Some("s3cret"));
        assert_eq!(form.text_value(fields::MAX_USERS), Some("5"));
        assert_eq!(form.text_value(fields::WHOIS), Some("moderators"));
        assert_eq!(form.bool_value(fields::MODERATED), Some(false));
        assert_eq!(form.bool_value(fields::MEMBERS_BY_DEFAULT), Some(true));
        assert_eq!(form.bool_value(fields::CHANGE_SUBJECT), Some(true));
        assert_eq!(form.bool_value(fields::ALLOW_INVITES), Some(false));
        assert_eq!(form.text_value("x-unknown"), Some("untouched"));
    }

    #[test]
    fn test_fill_form_keeps_defaults_when_options_unusable() {
        let mut p = policy();
        p.whois = "nobody".into();
        p.min_capacity = 500;
        let form = fill_form(&offered(), &p);
        assert_eq!(form.text_value(fields::WHOIS), Some("anyone"));
        assert_eq!(form.text_value(fields::MAX_USERS), Some("200"));
    }
}
