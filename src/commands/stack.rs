use devarch_core::error::Result;

use super::{load_settings, open_store};

pub async fn list(config: Option<&str>) -> Result<()> {
    let settings = load_settings(config).await?;
    let store = open_store(&settings).await?;
    let stacks = store.list_stacks(false).await?;

    if stacks.is_empty() {
        println!("no stacks");
        return Ok(());
    }
    for stack in stacks {
        let state = if stack.enabled { "enabled" } else { "disabled" };
        println!(
            "{:<24} {:<10} net={} {}",
            stack.name,
            state,
            stack.network(),
            stack.description
        );
    }
    Ok(())
}

pub async fn create(config: Option<&str>, name: &str, description: &str) -> Result<()> {
    let settings = load_settings(config).await?;
    let store = open_store(&settings).await?;
    let stack = store.create_stack(name, description, None).await?;
    println!("created stack '{}' (network {})", stack.name, stack.network());
    Ok(())
}

pub async fn show(config: Option<&str>, name: &str) -> Result<()> {
    let settings = load_settings(config).await?;
    let store = open_store(&settings).await?;
    let stack = store.require_stack(name).await?;
    let instances = store.list_instances(&stack.id).await?;

    println!("stack: {}", stack.name);
    println!("network: {}", stack.network());
    println!("enabled: {}", stack.enabled);
    if !stack.description.is_empty() {
        println!("description: {}", stack.description);
    }
    if let Some(checksum) = &stack.last_applied_checksum {
        println!("last applied: {}", checksum);
    }
    println!("instances:");
    if instances.is_empty() {
        println!("  (none)");
    }
    for instance in instances {
        let state = if instance.enabled { "" } else { " (disabled)" };
        println!(
            "  {} -> devarch-{}-{}{}",
            instance.instance_id, stack.name, instance.instance_id, state
        );
    }
    Ok(())
}

pub async fn delete(config: Option<&str>, name: &str) -> Result<()> {
    let settings = load_settings(config).await?;
    let store = open_store(&settings).await?;
    store.soft_delete_stack(name).await?;
    println!("moved stack '{}' to trash", name);
    Ok(())
}

pub async fn restore(config: Option<&str>, name: &str) -> Result<()> {
    let settings = load_settings(config).await?;
    let store = open_store(&settings).await?;
    let stack = store.restore_stack(name).await?;
    println!("restored stack '{}'", stack.name);
    Ok(())
}

pub async fn clone(config: Option<&str>, source: &str, target: &str) -> Result<()> {
    let settings = load_settings(config).await?;
    let store = open_store(&settings).await?;
    let stack = store.clone_stack(source, target).await?;
    println!(
        "cloned '{}' to '{}' (network {})",
        source,
        stack.name,
        stack.network()
    );
    Ok(())
}
