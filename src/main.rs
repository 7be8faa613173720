//
// Copyright (c) 2024 shoebox authors
//
use anyhow::{anyhow, Error};
use log::info;
use shoebox::data::migrations;
use shoebox::data::repositories::geo::find_location_repository;
use shoebox::data::repositories::probe::{MediaProbeImpl, TranscoderImpl};
use shoebox::data::repositories::{
    BlobRepositoryImpl, RecordRepositoryImpl, RenditionCache, SearchRepositoryImpl,
    DEFAULT_CACHE_BUDGET,
};
use shoebox::data::sources::rocksdb::EntityDataSourceImpl;
use shoebox::domain::entities::{SearchParams, SortField, SortOrder};
use shoebox::domain::repositories::{
    BlobRepository, LocationRepository, MediaProbe, RecordRepository, SearchRepository,
    Transcoder,
};
use shoebox::domain::usecases::{self, KeyedMutex, UseCase};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

// Everything the use cases need, assembled once at startup.
struct Context {
    records: Arc<dyn RecordRepository>,
    blobs: Arc<dyn BlobRepository>,
    probe: Arc<dyn MediaProbe>,
    geocoder: Option<Arc<dyn LocationRepository>>,
    searches: Arc<dyn SearchRepository>,
    guards: Arc<KeyedMutex>,
}

fn env_path(name: &str, fallback: &str) -> PathBuf {
    let path = env::var(name).unwrap_or_else(|_| fallback.to_owned());
    PathBuf::from(path)
}

fn make_context() -> Result<Context, Error> {
    let db_path = env_path("DB_PATH", "tmp/database");
    let assets_path = env_path("ASSETS_PATH", "tmp/blobs");
    let budget: u64 = env::var("CACHE_BUDGET")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CACHE_BUDGET);
    let datasource = Arc::new(EntityDataSourceImpl::new(&db_path)?);
    let transcoder: Arc<dyn Transcoder> = Arc::new(TranscoderImpl::new());
    let cache = Arc::new(RenditionCache::new(assets_path.join(".cache"), budget));
    let blobs = Arc::new(BlobRepositoryImpl::new(&assets_path, transcoder, cache));
    // bring older records up to the current schema before anything else
    // touches them; a downgrade aborts the process here
    migrations::migrate(&datasource, blobs.as_ref())?;
    Ok(Context {
        records: Arc::new(RecordRepositoryImpl::new(datasource)),
        blobs,
        probe: Arc::new(MediaProbeImpl::new()),
        geocoder: find_location_repository(),
        searches: Arc::new(SearchRepositoryImpl::new()),
        guards: Arc::new(KeyedMutex::new()),
    })
}

fn cmd_ingest(ctx: &Context) -> Result<(), Error> {
    let uploads_path = env_path("UPLOAD_PATH", "tmp/uploads");
    let usecase = usecases::ingest::IngestAssets::new(
        ctx.records.clone(),
        ctx.blobs.clone(),
        ctx.probe.clone(),
        ctx.geocoder.clone(),
        ctx.guards.clone(),
    );
    let params = usecases::ingest::Params::new(uploads_path);
    let count = usecase.call(params)?;
    println!("imported {} assets", count);
    Ok(())
}

fn cmd_import(ctx: &Context, files: &[String]) -> Result<(), Error> {
    let usecase = usecases::import::ImportAsset::new(
        ctx.records.clone(),
        ctx.blobs.clone(),
        ctx.probe.clone(),
        ctx.geocoder.clone(),
        ctx.guards.clone(),
    );
    for file in files {
        let filepath = PathBuf::from(file);
        let extension = filepath.extension().and_then(|e| e.to_str());
        let media_type = extension
            .map(usecases::infer_media_type)
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);
        let last_modified = std::fs::metadata(&filepath)
            .and_then(|meta| meta.modified())
            .ok()
            .map(chrono::DateTime::<chrono::Utc>::from);
        let params = usecases::import::Params::new(filepath, media_type, last_modified);
        let asset = usecase.call(params)?;
        println!("{} {}", asset.key, asset.filename);
    }
    Ok(())
}

fn cmd_query(ctx: &Context, query: &str) -> Result<(), Error> {
    let usecase = usecases::scan::ScanAssets::new(ctx.records.clone(), ctx.searches.clone());
    let params = usecases::scan::Params {
        query: query.to_owned(),
        sort_field: Some(SortField::Date),
        sort_order: Some(SortOrder::Descending),
    };
    let results = usecase.call(params)?;
    for result in results.iter() {
        println!("{} {} {}", result.datetime.format("%Y-%m-%d"), result.asset_id, result.filename);
    }
    println!("{} matching assets", results.len());
    Ok(())
}

fn cmd_search(ctx: &Context, tags: &[String]) -> Result<(), Error> {
    let usecase = usecases::search::SearchAssets::new(ctx.records.clone(), ctx.searches.clone());
    let params = SearchParams {
        tags: tags.iter().map(|t| Some(t.to_owned())).collect(),
        sort_field: Some(SortField::Date),
        sort_order: Some(SortOrder::Descending),
        ..Default::default()
    };
    let results = usecase.call(params)?;
    for result in results.iter() {
        println!("{} {} {}", result.datetime.format("%Y-%m-%d"), result.asset_id, result.filename);
    }
    println!("{} matching assets", results.len());
    Ok(())
}

fn cmd_pending(ctx: &Context) -> Result<(), Error> {
    let usecase = usecases::pending::FindPending::new(ctx.records.clone());
    let results = usecase.call(Default::default())?;
    for result in results.iter() {
        println!("{} {}", result.asset_id, result.filename);
    }
    println!("{} pending assets", results.len());
    Ok(())
}

fn cmd_count(ctx: &Context) -> Result<(), Error> {
    let usecase = usecases::count::CountAssets::new(ctx.records.clone());
    let count = usecase.call(usecases::NoParams {})?;
    println!("{} assets", count);
    Ok(())
}

fn cmd_tags(ctx: &Context) -> Result<(), Error> {
    let usecase = usecases::tags::AllTags::new(ctx.records.clone());
    let mut tags = usecase.call(usecases::NoParams {})?;
    tags.sort_by(|a, b| b.count.cmp(&a.count));
    for tag in tags.iter() {
        println!("{:>8} {}", tag.count, tag.label);
    }
    Ok(())
}

fn cmd_dump(ctx: &Context, filepath: &str) -> Result<(), Error> {
    let usecase = usecases::dump::Dump::new(ctx.records.clone());
    let params = usecases::dump::Params::new(PathBuf::from(filepath));
    let count = usecase.call(params)?;
    println!("dumped {} assets", count);
    Ok(())
}

fn cmd_load(ctx: &Context, filepath: &str) -> Result<(), Error> {
    let usecase = usecases::load::Load::new(ctx.records.clone());
    let params = usecases::load::Params::new(PathBuf::from(filepath));
    let count = usecase.call(params)?;
    println!("loaded {} assets", count);
    Ok(())
}

fn cmd_thumbnail(ctx: &Context, args: &[String]) -> Result<(), Error> {
    let (asset_id, width, height, outfile) = match args {
        [asset_id, width, height, outfile] => (
            asset_id,
            width.parse::<u32>()?,
            height.parse::<u32>()?,
            outfile,
        ),
        _ => return Err(anyhow!("usage: thumbnail <asset-id> <width> <height> <outfile>")),
    };
    let bytes = ctx.blobs.thumbnail(width, height, asset_id)?;
    std::fs::write(outfile, &bytes)?;
    println!("wrote {} bytes to {}", bytes.len(), outfile);
    Ok(())
}

fn usage() {
    println!("usage: shoebox <command> [args]");
    println!();
    println!("commands:");
    println!("  ingest                 import everything in the uploads directory");
    println!("  import <file>...       import the named files");
    println!("  query <query>          scan assets with the query language");
    println!("  search <tag>...        find assets bearing all of the tags");
    println!("  pending                list assets awaiting attention");
    println!("  count                  show the number of assets");
    println!("  tags                   list tags by usage");
    println!("  dump <file>            write all records to the named file");
    println!("  load <file>            read records from the named file");
    println!("  thumbnail <id> <w> <h> <out>  write a rendition of the asset");
}

fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1) else {
        usage();
        return Ok(());
    };
    let ctx = make_context()?;
    info!("shoebox starting up");
    match command.as_str() {
        "ingest" => cmd_ingest(&ctx),
        "import" => cmd_import(&ctx, &args[2..]),
        "query" => cmd_query(&ctx, &args[2..].join(" ")),
        "search" => cmd_search(&ctx, &args[2..]),
        "pending" => cmd_pending(&ctx),
        "count" => cmd_count(&ctx),
        "tags" => cmd_tags(&ctx),
        "dump" => {
            let filepath = args.get(2).ok_or_else(|| anyhow!("dump requires a file"))?;
            cmd_dump(&ctx, filepath)
        }
        "load" => {
            let filepath = args.get(2).ok_or_else(|| anyhow!("load requires a file"))?;
            cmd_load(&ctx, filepath)
        }
        "thumbnail" => cmd_thumbnail(&ctx, &args[2..]),
        _ => {
            usage();
            Err(anyhow!("unknown command: {}", command))
        }
    }
}
