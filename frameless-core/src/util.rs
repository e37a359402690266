use std::any;

/// Write every value into `out`, calling `f` for each one and placing `separator` between the
/// values that actually produced some output.
pub fn separated_by<T, F>(
    out: &mut String,
    values: impl IntoIterator<Item = T>,
    mut f: F,
    separator: &str,
) where
    F: FnMut(&mut String, T),
{
    let mut len = out.len();
    for v in values {
        if out.len() > len {
            out.push_str(separator);
        }
        len = out.len();
        f(out, v);
    }
}

/// Last path segment of the type name: `alloc::string::String` becomes `String`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let name = any::type_name::<T>();
    let end = name.find('<').unwrap_or(name.len());
    match name[..end].rfind("::") {
        Some(i) => &name[i + 2..],
        None => name,
    }
}

#[macro_export]
macro_rules! truncate_long {
    ($query:expr) => {
        format_args!(
            "{}{}",
            &$query[..::std::cmp::min($query.len(), 497)].trim_end(),
            if $query.len() > 497 { "..." } else { "" },
        )
    };
}

/// Sends the value through the channel and logs in case of error.
#[macro_export]
macro_rules! send_value {
    ($tx:expr, $value:expr) => {{
        if let Err(e) = $tx.try_send($value) {
            log::warn!("{:#}", e);
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separated_by_skips_empty_items() {
        let mut out = String::new();
        separated_by(
            &mut out,
            ["a", "", "b"],
            |out, v| out.push_str(v),
            ", ",
        );
        assert_eq!(out, "a, b");
    }

    #[test]
    fn short_type_name_strips_path() {
        assert_eq!(short_type_name::<String>(), "String");
        assert_eq!(short_type_name::<i64>(), "i64");
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec");
    }
}
