//! Realtime commands: join a diagram through the sync runtime.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::info;

use classgraph_collab::{
    ClientConfig, ConnectionState, DiagramId, GenerationMode, InboundEvent, SyncHandle,
    SyncRuntime, SyncView,
};
use classgraph_core::GraphState;

const JOIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Spawn the runtime and wait until the join went out.
async fn join(config: ClientConfig, id: DiagramId) -> Result<SyncHandle> {
    let handle = SyncRuntime::spawn(config, id);
    handle.surface_ready().await?;

    let mut watch = handle.watch();
    tokio::time::timeout(
        JOIN_TIMEOUT,
        watch.wait_for(|view| view.connection == ConnectionState::Joined),
    )
    .await
    .map_err(|_| anyhow!("Timed out joining diagram {id}"))?
    .context("Sync runtime stopped")?;
    Ok(handle)
}

fn print_graph(graph: &GraphState) {
    println!("{} classes, {} relations", graph.node_count(), graph.relation_count());
    for node in graph.nodes() {
        let label = node.label_text();
        let mut lines = label.lines();
        println!(
            "  [{}] {} ({} relations)",
            node.id,
            lines.next().unwrap_or_default(),
            graph.relations_of(&node.id).len()
        );
        for line in lines {
            println!("      {line}");
        }
    }
    for relation in graph.relations() {
        let name = |id: &str| graph.node(id).map(|n| n.name.clone()).unwrap_or_default();
        println!(
            "  {} --{}--> {}",
            name(&relation.from),
            relation.kind.as_str(),
            name(&relation.to)
        );
    }
}

fn describe(event: &InboundEvent) -> String {
    match event {
        InboundEvent::Snapshot(snapshot) => format!(
            "snapshot with {} classes",
            snapshot.content.elements.len()
        ),
        InboundEvent::ClassAdded(add) => format!("class added: {}", add.class_id),
        InboundEvent::ClassUpdated(update) => format!("class updated: {}", update.class_id),
        InboundEvent::ClassRemoved(remove) => format!("class removed: {}", remove.class_id),
        InboundEvent::RelationAdded(add) => format!("relation added: {}", add.relation_id),
        InboundEvent::RelationRemoved(remove) => {
            format!("relation removed: {}", remove.relation_id)
        }
        InboundEvent::GenerationFailed(failed) => format!("generation failed: {}", failed.error),
        other => other.kind().to_string(),
    }
}

pub async fn watch(config: ClientConfig, id: DiagramId) -> Result<()> {
    let handle = join(config, id).await?;
    let mut events = handle.bus().subscribe_all();
    print_graph(&handle.view().graph);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(InboundEvent::ElementMoving(_)) => {}
                Some(event) => {
                    println!("{}", describe(&event));
                    if matches!(event, InboundEvent::Snapshot(_) | InboundEvent::Generated(_)) {
                        let view = handle.view();
                        if matches!(event, InboundEvent::Snapshot(_)) && view.joins > 1 {
                            println!("rejoined after reconnect (join #{})", view.joins);
                        }
                        print_graph(&view.graph);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Wait for the outstanding generation to resolve one way or the other.
/// `before` is the completed count seen before the request went out.
async fn await_generation(handle: &SyncHandle, before: u64) -> Result<SyncView> {
    let mut watch = handle.watch();
    let view = watch
        .wait_for(|view| {
            !view.generating
                && (view.completed_generations > before || view.last_failure.is_some())
        })
        .await
        .context("Sync runtime stopped")?
        .clone();
    if let Some(failure) = &view.last_failure {
        bail!("{}", failure.message());
    }
    Ok(view)
}

pub async fn generate(
    config: ClientConfig,
    id: DiagramId,
    prompt: &str,
    mode: GenerationMode,
) -> Result<()> {
    let handle = join(config, id).await?;
    let before = handle.view().completed_generations;
    handle.generate(prompt, mode).await?;
    info!("Waiting for {mode} generation");
    let view = await_generation(&handle, before).await;
    handle.shutdown().await;
    print_graph(&view?.graph);
    Ok(())
}

pub async fn generate_image(
    config: ClientConfig,
    id: DiagramId,
    bytes: Vec<u8>,
    context: Option<String>,
    mode: GenerationMode,
) -> Result<()> {
    let handle = join(config, id).await?;
    let before = handle.view().completed_generations;
    handle.generate_from_image(bytes, context, mode).await?;
    info!("Waiting for {mode} generation from image");
    let view = await_generation(&handle, before).await;
    handle.shutdown().await;
    print_graph(&view?.graph);
    Ok(())
}
