//! Greeting predicate.
//!
//! The connection never parses EPP XML. It hands the first frame to a
//! [`GreetingValidator`] supplied by the message layer and only acts on the
//! yes/no answer.

/// Decides whether the first frame after connecting is a valid greeting.
pub trait GreetingValidator {
    /// `true` if `greeting` is acceptable.
    fn is_valid(&self, greeting: &[u8]) -> bool;
}

impl<F> GreetingValidator for F
where
    F: Fn(&[u8]) -> bool,
{
    fn is_valid(&self, greeting: &[u8]) -> bool {
        self(greeting)
    }
}

/// Accepts any frame containing a `<greeting` element, namespace prefixed or not.
///
/// A cheap byte scan for callers that do not have a message layer yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireGreetingElement;

impl GreetingValidator for RequireGreetingElement {
    fn is_valid(&self, greeting: &[u8]) -> bool {
        const TAG: &[u8] = b"greeting";

        greeting.windows(TAG.len() + 1).enumerate().any(|(i, window)| {
            if &window[1..] != TAG {
                return false;
            }
            // Element name must end here: `<greetings>` is not a greeting
            let terminated = greeting
                .get(i + window.len())
                .is_some_and(|b| matches!(*b, b'>' | b'/') || b.is_ascii_whitespace());
            if !terminated {
                return false;
            }
            match window[0] {
                b'<' => true,
                // `<epp:greeting`: walk back over the prefix to its `<`
                b':' => greeting[..i]
                    .iter()
                    .rev()
                    .find(|b| !(b.is_ascii_alphanumeric() || **b == b'-' || **b == b'_'))
                    .is_some_and(|b| *b == b'<'),
                _ => false,
            }
        })
    }
}
