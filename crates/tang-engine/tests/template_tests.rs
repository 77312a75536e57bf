//! Template-mode compilation and rendering.

use tang_engine::{Program, ProgramFlags};

fn render(source: &str) -> String {
    let program = Program::with_flags(
        source,
        ProgramFlags::IS_TEMPLATE | ProgramFlags::DISABLE_NATIVE,
    )
    .unwrap();
    let mut context = program.create_context();
    assert!(program.execute(&mut context));
    context.render_output()
}

#[test]
fn test_plain_text_passes_through() {
    assert_eq!(render("hello world"), "hello world");
}

#[test]
fn test_expression_island() {
    assert_eq!(render("Total: <%= 2 + 3 %>!"), "Total: 5!");
}

#[test]
fn test_code_island_drives_text() {
    assert_eq!(
        render("<% for (i = 0; i < 3; i = i + 1) { %>x<% } %>"),
        "xxx"
    );
}

#[test]
fn test_escaping_applies_only_to_tagged_values() {
    // Literal template text is trusted; values tagged html are escaped.
    assert_eq!(
        render("<b><%= \"a&b\".html %></b>"),
        "<b>a&amp;b</b>"
    );
}

#[test]
fn test_state_spans_islands() {
    assert_eq!(
        render("<% x = 2; %>x is <%= x %> and twice is <%= x * 2 %>"),
        "x is 2 and twice is 4"
    );
}

#[test]
fn test_unterminated_island_is_a_parse_error() {
    assert!(Program::with_flags(
        "text <% broken",
        ProgramFlags::IS_TEMPLATE | ProgramFlags::DISABLE_NATIVE
    )
    .is_err());
}
