use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use hr_export_core::domains::export::{
    DataSourceKey, ExportConfig, ExportFormat, ExportRequest, ExportService, HistoryFilter, InMemoryDataSource, Record,
};

fn sample_employees() -> Vec<Record> {
    ["Ada Lovelace", "Grace Hopper", "Alan Turing", "Edsger Dijkstra"]
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            json!({
                "id": i + 1,
                "name": name,
                "department": if i % 2 == 0 { "Engineering" } else { "Research" },
                "salary": 90_000 + i * 5_000,
            })
            .as_object()
            .cloned()
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    hr_export_core::init_logging();

    let config = ExportConfig::from_env()?;
    println!("Writing exports to {}", config.storage_dir.display());

    let source = InMemoryDataSource::new().with_rows(DataSourceKey::Employees, sample_employees());
    let service = ExportService::new(config, Arc::new(source))?;
    let owner = Uuid::new_v4();

    let mut handles = Vec::new();
    for format in ExportFormat::ALL {
        let request = ExportRequest {
            data_source: DataSourceKey::Employees.as_str().to_string(),
            format: format.as_str().to_string(),
            ..Default::default()
        };
        handles.push(service.submit_tracked(owner, request)?);
    }
    println!("Queue: {:?}", service.queue_stats());

    for handle in handles {
        let id = handle.id;
        let mut updates = handle.into_stream();
        while let Some(status) = updates.next().await {
            println!("{} -> {:?}", id, status);
            if status.is_terminal() {
                break;
            }
        }
        println!("{}", serde_json::to_string_pretty(&service.get_status(id)?)?);
    }

    for summary in service.get_history(owner, &HistoryFilter::default()) {
        if let Ok(artifact) = service.authorize_download(summary.id, owner) {
            println!("{:<6} {:>8} bytes  {}", summary.format.as_str(), artifact.byte_size, artifact.path.display());
        }
    }

    let removed = service.reap_expired().await;
    println!("Reaped {} expired exports", removed.removed.len());
    Ok(())
}
