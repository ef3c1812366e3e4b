use std::{fmt, str::FromStr};

use crate::{include_res, profiles::Role, res::escape_html, AppError};

const LAYOUT: &str = include_res!(str, "/emails/layout.html");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// Authentication lifecycle events the identity platform asks us to email about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEmailKind {
    Signup,
    Recovery,
    EmailChange,
    MagicLink,
    Invite,
}

impl AuthEmailKind {
    pub fn as_str(&self) -> &'static str {
        use AuthEmailKind::*;
        match self {
            Signup => "signup",
            Recovery => "recovery",
            EmailChange => "email_change",
            MagicLink => "magiclink",
            Invite => "invite",
        }
    }

    fn subject(&self) -> &'static str {
        use AuthEmailKind::*;
        match self {
            Signup => "Confirm your email",
            Recovery => "Reset your password",
            EmailChange => "Confirm your new email",
            MagicLink => "Your sign in link",
            Invite => "You have been invited",
        }
    }

    fn template(&self) -> &'static str {
        use AuthEmailKind::*;
        match self {
            Signup => include_res!(str, "/emails/signup.html"),
            Recovery => include_res!(str, "/emails/recovery.html"),
            EmailChange => include_res!(str, "/emails/email_change.html"),
            MagicLink => include_res!(str, "/emails/magiclink.html"),
            Invite => include_res!(str, "/emails/invite.html"),
        }
    }
}

impl FromStr for AuthEmailKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use AuthEmailKind::*;
        Ok(match s {
            "signup" => Signup,
            "recovery" => Recovery,
            "email_change" | "email_change_new" | "email_change_current" => EmailChange,
            "magiclink" => MagicLink,
            "invite" => Invite,
            other => return Err(AppError::validation(format!("unknown email action type {other:?}"))),
        })
    }
}

impl fmt::Display for AuthEmailKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replaces every `{key}` in one pass. Substituted values are never scanned
/// again, so a value containing `{password}` stays literal.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after_brace = &rest[start + 1..];
        let hit = values.iter().find_map(|(key, value)| {
            let after = after_brace.strip_prefix(*key)?.strip_prefix('}')?;
            Some((*value, after))
        });
        match hit {
            Some((value, after)) => {
                out.push_str(value);
                rest = after;
            }
            None => {
                out.push('{');
                rest = after_brace;
            }
        }
    }
    out.push_str(rest);
    out
}

fn layout(subject: &str, body: &str) -> RenderedEmail {
    RenderedEmail {
        subject: subject.to_owned(),
        html: fill(LAYOUT, &[("subject", escape_html(subject).as_str()), ("body", body)]),
    }
}

pub fn auth_email(kind: AuthEmailKind, email: &str, token: &str, link: &str) -> RenderedEmail {
    let body = fill(kind.template(), &[
        ("email", escape_html(email).as_str()),
        ("token", escape_html(token).as_str()),
        ("link", escape_html(link).as_str()),
    ]);
    layout(kind.subject(), &body)
}

pub fn credentials_email(full_name: &str, email: &str, role: Role, password: &str, link: &str) -> RenderedEmail {
    let body = fill(include_res!(str, "/emails/credentials.html"), &[
        ("name", escape_html(full_name).as_str()),
        ("role", role.as_str()),
        ("email", escape_html(email).as_str()),
        ("password", escape_html(password).as_str()),
        ("link", escape_html(link).as_str()),
    ]);
    layout("Your campus account is ready", &body)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("signup", AuthEmailKind::Signup)]
    #[case("recovery", AuthEmailKind::Recovery)]
    #[case("email_change", AuthEmailKind::EmailChange)]
    #[case("email_change_new", AuthEmailKind::EmailChange)]
    #[case("magiclink", AuthEmailKind::MagicLink)]
    #[case("invite", AuthEmailKind::Invite)]
    fn parses_action_types(#[case] raw: &str, #[case] kind: AuthEmailKind) {
        assert_eq!(raw.parse::<AuthEmailKind>().unwrap(), kind);
    }

    #[test]
    fn unknown_action_type_is_a_validation_error() {
        assert!(matches!("reauthentication_x".parse::<AuthEmailKind>(), Err(AppError::Validation(_))));
    }

    #[test]
    fn template_is_chosen_by_kind() {
        let recovery = auth_email(AuthEmailKind::Recovery, "ada@campus.edu", "123456", "https://x/verify?a=1&b=2");
        assert_eq!(recovery.subject, "Reset your password");
        assert!(recovery.html.contains("Reset my password"));
        assert!(recovery.html.contains("ada@campus.edu"));
        assert!(recovery.html.contains("123456"));
        assert!(recovery.html.contains("https://x/verify?a=1&amp;b=2"));
        assert!(!recovery.html.contains("{body}"));

        let signup = auth_email(AuthEmailKind::Signup, "ada@campus.edu", "1", "https://x");
        assert!(signup.html.contains("Confirm my email"));
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let email = credentials_email("{password} {link}", "ada@campus.edu", Role::Student, "Pw12", "https://campus/login");
        assert!(email.html.contains("{password} {link}"));
        assert_eq!(email.html.matches("Pw12").count(), 1);

        assert_eq!(fill("{a}{b} {c} {", &[("a", "{b}"), ("b", "2")]), "{b}2 {c} {");
    }

    #[test]
    fn credentials_are_escaped() {
        let email = credentials_email("<Ada>", "ada@campus.edu", Role::Mentor, "Pw12", "https://campus/login");
        assert!(email.html.contains("&lt;Ada&gt;"));
        assert!(email.html.contains("mentor account"));
        assert!(email.html.contains("Pw12"));
        assert!(!email.html.contains("{password}"));
    }
}
