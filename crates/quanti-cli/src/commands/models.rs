//! `quanti models`: list supported model aliases.

use quanti_core::MODELS;

/// Run the models command.
pub fn run() {
    println!("{:<18} Repository", "Alias");
    println!("{}", "-".repeat(70));
    for (alias, repo) in MODELS {
        println!("{alias:<18} {repo}");
    }
}
