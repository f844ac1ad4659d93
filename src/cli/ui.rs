use owo_colors::OwoColorize;

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

pub fn print_warning(message: &str) {
    eprintln!("{} {}", "!".yellow(), message);
}

pub fn print_info(message: &str) {
    println!("{}", message);
}
