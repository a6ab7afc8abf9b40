//! HTTP verbs supported by the client facades.

use strum::{Display, EnumIter, EnumString};

/// HTTP methods exposed as verb methods on the facades.
///
/// Besides the wire name, each method decides where caller supplied query
/// parameters go: verbs without a request body carry them as encoded
/// `fields`, verbs with a body get them merged into the URL query string so
/// they never collide with the body encoding.
///
/// ## Examples
///
/// ```rust
/// use hpool_lib::Method;
///
/// let method: Method = "patch".parse().unwrap();
/// assert_eq!(method, Method::Patch);
/// assert!(method.has_body());
/// assert!(!method.query_in_fields());
/// assert_eq!(method.to_string(), "PATCH");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Method {
    /// HTTP GET - Retrieve a resource.
    Get,
    /// HTTP POST - Create a resource or trigger an action.
    Post,
    /// HTTP PUT - Replace a resource entirely.
    Put,
    /// HTTP DELETE - Remove a resource.
    Delete,
    /// HTTP HEAD - Retrieve headers only.
    Head,
    /// HTTP OPTIONS - Query supported methods.
    Options,
    /// HTTP PATCH - Partially update a resource.
    Patch,
    /// HTTP TRACE - Echo the request for debugging.
    Trace,
}

impl Method {
    /// Returns `true` if this method carries a request body.
    ///
    /// POST, PUT, and PATCH carry bodies. Other methods do not.
    pub fn has_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    /// Returns `true` if query parameters travel as encoded `fields`.
    ///
    /// This is the complement of [`has_body`](Self::has_body): body-carrying
    /// verbs must have their parameters merged into the URL instead.
    pub fn query_in_fields(&self) -> bool {
        !self.has_body()
    }

    /// Converts to the equivalent `reqwest::Method`.
    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Head => reqwest::Method::HEAD,
            Self::Options => reqwest::Method::OPTIONS,
            Self::Patch => reqwest::Method::PATCH,
            Self::Trace => reqwest::Method::TRACE,
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        method.to_reqwest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_display() {
        assert_eq!(Method::Get.to_string(), "GET");
        assert_eq!(Method::Options.to_string(), "OPTIONS");
        assert_eq!(Method::Trace.to_string(), "TRACE");
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("Delete".parse::<Method>().unwrap(), Method::Delete);
        assert_eq!("PATCH".parse::<Method>().unwrap(), Method::Patch);
        assert!("FETCH".parse::<Method>().is_err());
    }

    #[test]
    fn test_query_policy_splits_verbs() {
        let in_fields: Vec<_> = Method::iter().filter(Method::query_in_fields).collect();
        assert_eq!(
            in_fields,
            vec![
                Method::Get,
                Method::Delete,
                Method::Head,
                Method::Options,
                Method::Trace
            ]
        );
        assert!(Method::Post.has_body());
        assert!(Method::Put.has_body());
        assert!(Method::Patch.has_body());
    }

    #[test]
    fn test_to_reqwest() {
        assert_eq!(Method::Get.to_reqwest(), reqwest::Method::GET);
        assert_eq!(reqwest::Method::from(Method::Trace), reqwest::Method::TRACE);
    }
}
