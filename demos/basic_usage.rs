//! Basic usage example for sqlrpc-exec.

use sqlrpc_exec::{
    ConnectionParams, ExecuteOutcome, ExplainFormat, SharedConnection, Statement, TcpConnection,
};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

const CONN_STRING: &str = "sqlrpc://localhost:4050/demo?query_timeout=30&fetch_size=1000";

/// Opens a connection and returns it with its statement defaults.
async fn example_connection() -> Result<(SharedConnection, ConnectionParams), Box<dyn Error>> {
    let params: ConnectionParams = CONN_STRING.parse()?;
    let conn = TcpConnection::connect(&params).await?;
    Ok((Arc::new(Mutex::new(conn)), params))
}

/// Inserts rows with bound parameters and returns the update count.
async fn example_parameters(stmt: &mut Statement) -> Result<i64, Box<dyn Error>> {
    stmt.execute_update("CREATE TABLE demo_people (id INT, name VARCHAR(100))")
        .await?;

    let mut inserted = 0;
    for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "O'Brien")] {
        stmt.bind(0, id);
        stmt.bind(1, name);
        inserted += stmt
            .execute_update("INSERT INTO demo_people VALUES (?, ?)")
            .await?;
    }
    stmt.clear_parameters();
    Ok(inserted)
}

/// Runs a few meta-commands and prints what they return.
async fn example_meta_commands(stmt: &mut Statement) -> Result<(), Box<dyn Error>> {
    if let ExecuteOutcome::ResultSet(rs) = stmt.execute("GET SCHEMA").await? {
        println!("Schema: {:?}", rs.first_column_text());
    }

    if let Some(tables) = stmt.execute("LIST TABLES").await?.into_result_set() {
        println!("Tables: {:?}", tables.first_column_text());
    }

    stmt.execute("SET MAXROWS 2").await?;
    let rs = stmt.execute_query("SELECT * FROM demo_people").await?;
    println!("Capped query opened: {:?}", rs.cursor());
    stmt.close_result_set().await?;
    stmt.set_max_rows(0)?;

    let plan = stmt
        .explain("SELECT name FROM demo_people WHERE id = 2", ExplainFormat::Json)
        .await?;
    println!("Plan:\n{}", plan);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let (conn, params) = example_connection().await?;
    println!("Connected: {}", params);

    let mut stmt = Statement::new(conn, params.statement.clone());
    let cancel = stmt.cancel_handle();

    let rows = example_parameters(&mut stmt).await?;
    println!("Inserted: {} row(s)", rows);

    example_meta_commands(&mut stmt).await?;

    // Nothing is running, so this only reports that no query is associated.
    println!("Cancel: {:?}", cancel.cancel().await);

    stmt.execute_update("DROP TABLE demo_people").await?;
    stmt.close().await?;
    println!("Done");

    Ok(())
}
