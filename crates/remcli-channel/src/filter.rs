//! Class-name gate applied while decoding records

use crate::error::ChannelError;
use std::collections::HashSet;
use tracing::{trace, warn};

#[derive(Debug, Clone)]
enum DenyRule {
    Prefix(&'static str),
    Exact(&'static str),
    Contains(&'static str),
    /// Everything under the package except exception types
    PrefixUnlessException(&'static str),
}

impl DenyRule {
    fn matches(&self, class: &str) -> bool {
        match self {
            DenyRule::Prefix(prefix) => class.starts_with(prefix),
            DenyRule::Exact(name) => class == *name,
            DenyRule::Contains(fragment) => class.contains(fragment),
            DenyRule::PrefixUnlessException(prefix) => match class.strip_prefix(prefix) {
                Some(rest) => !is_exception_name(rest),
                None => false,
            },
        }
    }
}

/// `a.b.SomeException` made of alphanumeric segments
fn is_exception_name(rest: &str) -> bool {
    let segments_ok = rest
        .split('.')
        .all(|segment| segment.chars().all(|c| c.is_ascii_alphanumeric()));
    segments_ok && rest.ends_with("Exception")
}

/// Known deserialization gadget families
const STANDARD_DENY_LIST: &[DenyRule] = &[
    DenyRule::Prefix("bsh."),
    DenyRule::Prefix("com.google.inject."),
    DenyRule::Prefix("com.mchange.v2.c3p0."),
    DenyRule::Prefix("com.sun.jndi."),
    DenyRule::Prefix("com.sun.corba."),
    DenyRule::Prefix("com.sun.javafx."),
    DenyRule::Prefix("com.sun.org.apache.regex.internal."),
    DenyRule::Prefix("java.awt."),
    DenyRule::Exact("java.lang.reflect.Method"),
    DenyRule::Prefix("java.rmi."),
    DenyRule::Prefix("javax.management."),
    DenyRule::Prefix("javax.naming."),
    DenyRule::Prefix("javax.script."),
    DenyRule::Prefix("javax.swing."),
    DenyRule::Prefix("net.sf.json."),
    DenyRule::Prefix("org.apache.commons.beanutils."),
    DenyRule::Prefix("org.apache.commons.collections.functors."),
    DenyRule::Prefix("org.apache.myfaces."),
    DenyRule::Prefix("org.apache.wicket."),
    DenyRule::Contains("org.apache.xalan"),
    DenyRule::Prefix("org.codehaus.groovy.runtime."),
    DenyRule::Prefix("org.hibernate."),
    DenyRule::Prefix("org.python."),
    DenyRule::PrefixUnlessException("org.springframework."),
    DenyRule::Prefix("sun.rmi."),
    DenyRule::Prefix("javax.imageio."),
    DenyRule::Exact("java.util.ServiceLoader"),
    DenyRule::Exact("java.net.URLClassLoader"),
    DenyRule::Exact("java.security.SignedObject"),
];

/// Decides which record classes may be decoded
///
/// A class is accepted only if no deny rule matches and it is on the allow
/// list. The deny list always wins, even over an explicit allow entry.
#[derive(Debug, Clone)]
pub struct ClassFilter {
    deny: Vec<DenyRule>,
    allow: HashSet<String>,
}

impl ClassFilter {
    /// The standard deny list with an empty allow list
    pub fn standard() -> Self {
        Self {
            deny: STANDARD_DENY_LIST.to_vec(),
            allow: HashSet::new(),
        }
    }

    /// Add a class to the allow list
    pub fn allow(mut self, class: impl Into<String>) -> Self {
        self.allow.insert(class.into());
        self
    }

    pub fn is_denied(&self, class: &str) -> bool {
        self.deny.iter().any(|rule| rule.matches(class))
    }

    pub fn is_allowed(&self, class: &str) -> bool {
        !self.is_denied(class) && self.allow.contains(class)
    }

    /// Reject `class` with a [`ChannelError::SecurityViolation`] unless allowed
    pub fn check(&self, class: &str) -> Result<(), ChannelError> {
        if self.is_denied(class) {
            warn!("rejecting {} according to standard deny list", class);
            return Err(ChannelError::SecurityViolation {
                class: class.to_string(),
            });
        }
        if !self.allow.contains(class) {
            warn!("rejecting {}: not on the allow list", class);
            return Err(ChannelError::SecurityViolation {
                class: class.to_string(),
            });
        }
        trace!("permitting {}", class);
        Ok(())
    }
}

impl Default for ClassFilter {
    fn default() -> Self {
        Self::standard()
    }
}
