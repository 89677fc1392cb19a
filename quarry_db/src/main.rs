use std::env;
use std::process;

use granite::database::Database;
use quarry_db::catalog::load_catalog;
use quarry_db::stats;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: quarry_db <catalog-file>");
        process::exit(1);
    }

    let db = Database::new();
    let tables = match load_catalog(&db, &args[1]) {
        Ok(tables) => tables,
        Err(e) => {
            eprintln!("failed to load catalog: {e:?}");
            process::exit(1);
        }
    };
    println!("Loaded {} table(s). Computing table stats.", tables.len());

    let stats_map = match stats::compute_statistics(&db, stats::IO_COST_PER_PAGE) {
        Ok(stats_map) => stats_map,
        Err(e) => {
            eprintln!("failed to compute statistics: {e:?}");
            process::exit(1);
        }
    };
    for name in &tables {
        if let Some(s) = stats_map.get(name) {
            println!(
                "{name}: {} tuple(s), {} page(s), scan cost {:.0}",
                s.total_tuples(),
                s.num_pages(),
                s.estimate_scan_cost()
            );
        }
    }
    println!("Done.");
}
