const RESERVED: &[&str] = &[
  "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
  "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Whether `name` can be bound as a global call object.
///
/// Follows Lua's identifier grammar: ASCII letters, digits and underscores,
/// not starting with a digit, and not a reserved word.
pub fn is_valid_identifier(name: &str) -> bool {
  let mut chars = name.chars();
  let Some(first) = chars.next() else {
    return false;
  };
  if !(first.is_ascii_alphabetic() || first == '_') {
    return false;
  }
  if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
    return false;
  }
  !RESERVED.contains(&name)
}
