use crate::error::{Error, Result};

/// Maximum length for a stack or instance name.
pub const MAX_NAME_LEN: usize = 40;
/// Maximum length for a combined container name.
pub const MAX_CONTAINER_NAME_LEN: usize = 127;

/// Prefix for every name DevArch derives.
pub const NAME_PREFIX: &str = "devarch";

/// Reserved label namespace. Keys under it are injected by the resolver and
/// win over template and instance labels.
pub const LABEL_NAMESPACE: &str = "devarch.";
pub const LABEL_STACK_ID: &str = "devarch.stack_id";
pub const LABEL_INSTANCE_ID: &str = "devarch.instance_id";
pub const LABEL_TEMPLATE_SERVICE_ID: &str = "devarch.template_service_id";
pub const LABEL_MANAGED_BY: &str = "devarch.managed_by";
pub const MANAGED_BY_VALUE: &str = "devarch";

/// DNS-safe check: lowercase alphanumerics and hyphens, no leading or
/// trailing hyphen, non-empty.
pub fn is_dns_safe(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if value.starts_with('-') || value.ends_with('-') {
        return false;
    }
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Reduce arbitrary input to a DNS-safe slug, used for validation
/// suggestions.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_hyphen = true;
    for c in input.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug.truncate(MAX_NAME_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn validate_dns_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(format!("{} must not be empty", field)).with_field(field));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(Error::validation(format!(
            "{} '{}' exceeds {} characters",
            field, value, MAX_NAME_LEN
        ))
        .with_field(field)
        .with_suggestion(slugify(value)));
    }
    if !is_dns_safe(value) {
        return Err(Error::validation(format!(
            "{} '{}' must contain only lowercase alphanumerics and hyphens and must not start or end with a hyphen",
            field, value
        ))
        .with_field(field)
        .with_suggestion(slugify(value)));
    }
    Ok(())
}

pub fn validate_stack_name(name: &str) -> Result<()> {
    validate_dns_name("stack", name)
}

pub fn validate_instance_id(stack: &str, instance: &str) -> Result<()> {
    validate_dns_name("instance", instance)?;
    let combined = container_name(stack, instance);
    if combined.len() > MAX_CONTAINER_NAME_LEN {
        return Err(Error::validation(format!(
            "container name '{}' exceeds {} characters",
            combined, MAX_CONTAINER_NAME_LEN
        ))
        .with_field("instance"));
    }
    Ok(())
}

pub fn validate_template_name(name: &str) -> Result<()> {
    validate_dns_name("template", name)
}

/// `devarch-{stack}-{instance}`.
pub fn container_name(stack: &str, instance: &str) -> String {
    format!("{}-{}-{}", NAME_PREFIX, stack, instance)
}

/// `devarch-{stack}-net`, unless the stack carries an explicit override.
pub fn network_name(stack: &str) -> String {
    format!("{}-{}-net", NAME_PREFIX, stack)
}

/// Prefix shared by every container of a stack.
pub fn stack_container_prefix(stack: &str) -> String {
    format!("{}-{}-", NAME_PREFIX, stack)
}

/// Whether a label key falls inside the reserved `devarch.*` namespace.
pub fn is_reserved_label(key: &str) -> bool {
    key.starts_with(LABEL_NAMESPACE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_safe_accepts_plain_names() {
        assert!(is_dns_safe("a"));
        assert!(is_dns_safe("my-stack-2"));
        assert!(is_dns_safe("0abc"));
    }

    #[test]
    fn dns_safe_rejects_bad_shapes() {
        assert!(!is_dns_safe(""));
        assert!(!is_dns_safe("-lead"));
        assert!(!is_dns_safe("trail-"));
        assert!(!is_dns_safe("Upper"));
        assert!(!is_dns_safe("under_score"));
        assert!(!is_dns_safe("dot.ted"));
    }

    #[test]
    fn name_length_boundary() {
        let at_limit = "a".repeat(MAX_NAME_LEN);
        assert!(validate_stack_name(&at_limit).is_ok());

        let over = "a".repeat(MAX_NAME_LEN + 1);
        let err = validate_stack_name(&over).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
        assert_eq!(err.field.as_deref(), Some("stack"));
    }

    #[test]
    fn slugify_produces_valid_suggestions() {
        assert_eq!(slugify("My Cool App!"), "my-cool-app");
        assert_eq!(slugify("__lead"), "lead");
        assert_eq!(slugify("a--b"), "a-b");
        assert!(is_dns_safe(&slugify("Some Very Strange  NAME (v2)")));
    }

    #[test]
    fn derived_names() {
        assert_eq!(container_name("a", "web"), "devarch-a-web");
        assert_eq!(network_name("a"), "devarch-a-net");
        assert_eq!(stack_container_prefix("a"), "devarch-a-");
    }

    #[test]
    fn reserved_labels() {
        assert!(is_reserved_label("devarch.stack_id"));
        assert!(is_reserved_label("devarch.anything"));
        assert!(!is_reserved_label("com.example.role"));
    }

    #[test]
    fn validation_error_carries_suggestion() {
        let err = validate_stack_name("My Stack").unwrap_err();
        assert_eq!(err.suggestion.as_deref(), Some("my-stack"));
    }
}
