//! Field name recasing.

/// Recases a field name to camelCase.
///
/// The name is split on `_`, `-` and whitespace. The first character of the
/// first segment is lower-cased and the first character of every following
/// segment is upper-cased; everything else is kept as is, so names that are
/// already camelCase come back unchanged.
///
/// ```
/// use eventstore_migrate::casing::to_camel_case;
///
/// assert_eq!(to_camel_case("EventSource_Id"), "eventSourceId");
/// assert_eq!(to_camel_case("bounded_context"), "boundedContext");
/// assert_eq!(to_camel_case("alreadyCamel"), "alreadyCamel");
/// ```
#[must_use]
pub fn to_camel_case(name: &str) -> String {
    let mut result = String::with_capacity(name.len());

    let segments = name
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|segment| !segment.is_empty());

    for (index, segment) in segments.enumerate() {
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            if index == 0 {
                result.extend(first.to_lowercase());
            } else {
                result.extend(first.to_uppercase());
            }
            result.push_str(chars.as_str());
        }
    }

    result
}
