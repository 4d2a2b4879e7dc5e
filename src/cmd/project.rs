//! Project initialization: `tutorstream init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use tutorstream::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized tutorstream project at {}",
            result.data_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .tutorstream/");
        println!("  ├── tutorstream.toml   # Backend and conversation settings");
        println!("  └── store/             # Saved conversation");
        println!();
        println!("Next steps:");
        println!("  1. Point [backend] base_url at your server (or set TUTORSTREAM_API_URL)");
        println!("  2. Run `tutorstream chat` to start a conversation");
    } else {
        println!(
            "tutorstream project already initialized at {}",
            result.data_dir.display()
        );
        if result.wrote_config {
            println!("Wrote missing tutorstream.toml with defaults.");
        } else {
            println!("Directory structure verified.");
        }
    }

    Ok(())
}
