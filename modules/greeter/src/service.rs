use std::sync::atomic::{AtomicU64, Ordering};

use modhost::Session;

/// Builds greetings and counts them. Shared through the dependency container.
#[derive(Debug)]
pub struct GreeterService {
    greeting: String,
    greeted: AtomicU64,
}

impl GreeterService {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            greeting: greeting.into(),
            greeted: AtomicU64::new(0),
        }
    }

    /// `"{greeting} {name}, welcome to the {world} world"`.
    ///
    /// Without an explicit name the caller's role stands in, and anonymous
    /// callers with no role are greeted as "stranger".
    pub fn greet(&self, name: Option<&str>, session: &Session, world: &str) -> String {
        self.greeted.fetch_add(1, Ordering::Relaxed);
        let who = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n,
            None if !session.role().is_empty() => session.role(),
            None => "stranger",
        };
        format!("{} {who}, welcome to the {world} world", self.greeting)
    }

    pub fn greeted(&self) -> u64 {
        self.greeted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_role_then_stranger() {
        let svc = GreeterService::new("hi");
        let user = Session::new(None, "editor");
        let anon = Session::new(None, "");

        assert_eq!(
            svc.greet(Some("Ann"), &user, "good"),
            "hi Ann, welcome to the good world"
        );
        assert_eq!(
            svc.greet(Some("  "), &user, "good"),
            "hi editor, welcome to the good world"
        );
        assert_eq!(
            svc.greet(None, &anon, "mars"),
            "hi stranger, welcome to the mars world"
        );
        assert_eq!(svc.greeted(), 3);
    }
}
