use imarkdown_core::prelude::*;
use imarkdown_core::ExpressionResult;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("imarkdown notebook demo");
    println!("-----------------------");

    // 1. A kernel that knows a few names
    let kernel = MockKernel::new()
        .with_value("len(rows)", "128")
        .with_value("title", "'Quarterly report'")
        .with_result(
            "missing",
            ExpressionResult::error("NameError", "name 'missing' is not defined", Vec::new()),
        );

    let runtime = ImarkdownRuntime::new(ImarkdownConfig::from_env())?.with_engine(kernel);

    // 2. Render the cell: placeholders appear where the directives were
    let mut notebook = Notebook::from_markdown(
        "# {{title}}\n\nWe processed {{len(rows)}} rows.\n\nBroken: {{missing}}",
    );
    let (index, cell) = notebook.to_markdown_cells(true).remove(0);
    let cell = cell.into_shared();

    runtime.render_input(&cell).await?;
    println!("\nBefore execution:\n{}", cell.lock().await.tree().to_html());

    // 3. Execute: results are stored in metadata and rendered in place
    let report = runtime.execute_cell(&cell).await?;
    println!("\nAfter execution ({:?}):\n{}", report.evaluation, cell.lock().await.tree().to_html());

    // 4. Persist and reload without a kernel
    notebook.update_metadata(index, cell.lock().await.metadata())?;
    let json = notebook.to_json()?;

    let mut reloaded = Notebook::from_json(&json)?;
    let offline = ImarkdownRuntime::new(ImarkdownConfig::default())?;
    let (_, cell) = reloaded.to_markdown_cells(true).remove(0);
    let cell = cell.into_shared();
    offline.render_input(&cell).await?;

    println!("\nAfter reload:\n{}", cell.lock().await.tree().to_html());
    Ok(())
}
