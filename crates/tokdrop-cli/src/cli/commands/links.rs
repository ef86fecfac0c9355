use tokdrop_core::links::extract_links;

/// Prints each candidate link on its own line.
pub fn run(text: &str) {
    for link in extract_links(Some(text)) {
        println!("{link}");
    }
}
