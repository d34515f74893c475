use anyhow::Result;
use clap::Parser;

use corrective_rag::config::Settings;
use corrective_rag::crag::CragOutcome;
use corrective_rag::{bootstrap, telemetry};

#[derive(Parser, Debug)]
#[command(name = "crag-ask")]
#[command(about = "Answer one question with the corrective RAG pipeline")]
struct Args {
    /// The question to answer
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,

    /// Print the full outcome as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load()?;
    telemetry::init_logging(&settings.logging);

    let crag = bootstrap::build_pipeline(&settings).await?;
    let query = args.query.join(" ");
    let outcome = crag.run(&query).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_trace(&outcome);
    }

    Ok(())
}

fn print_trace(outcome: &CragOutcome) {
    println!("Query domain: {}", outcome.domain.as_str());
    if let Some(verdict) = &outcome.verdict {
        println!("Retrieved documents: {}", outcome.retrieved);
        println!("Evaluation: {}", verdict);
    }
    match outcome.knowledge_source {
        Some(source) => println!("Knowledge source: {}", source),
        None => println!("Knowledge source: none"),
    }
    println!(
        "Confidence: {} ({} sources)",
        outcome.confidence.as_str(),
        outcome.source_count
    );
    println!("\nFinal Answer:\n{}", outcome.answer);
}
