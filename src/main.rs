use log::info;
use proc_engine::{ProcessEngine, ProcessModel, TaskQuery, UserTaskModel};
use serde_json::{Map, Value as JsonValue};
use std::error::Error;
use std::io::{self, Write};

/// Menú interactivo sobre el motor de procesos.
///
/// La configuración sale del entorno (`PROC_DB_URL`, `PROC_HISTORY_LEVEL`,
/// ...). Sin URL el motor trabaja en memoria y se pierde al salir.
fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();
    let engine = ProcessEngine::from_env()?;
    info!("CLI iniciada");
    println!("Historia: {}  Dialecto: {}",
             engine.config().history_level,
             engine.session_factory().dialect());

    loop {
        println!("\n== Process CLI menu ==");
        println!("1) Desplegar proceso de ejemplo (approval)");
        println!("2) Ver definiciones");
        println!("3) Iniciar instancia");
        println!("4) Ver instancias en curso");
        println!("5) Ver tareas");
        println!("6) Reclamar tarea");
        println!("7) Completar tarea");
        println!("8) Ver / fijar variables");
        println!("9) Eliminar instancia");
        println!("10) Ver historia");
        println!("11) Salir");
        let choice = prompt("Elige una opción: ")?;
        match choice.trim() {
            "1" => {
                let model = ProcessModel::new("approval", "Aprobación").user_task(UserTaskModel::new("draft", "Redactar"))
                                                                       .user_task(UserTaskModel::new("review", "Revisar").candidate_group("managers"));
                match engine.repository_service().deploy("demo", vec![model]) {
                    Ok(d) => {
                        for def in d.definitions {
                            println!("Desplegado {} (versión {})", def.id, def.version);
                        }
                    }
                    Err(e) => eprintln!("Error desplegando: {}", e),
                }
            }
            "2" => match engine.repository_service().process_definitions() {
                Ok(defs) => {
                    println!("\nID                                          | KEY          | VERSION");
                    println!("----------------------------------------------------------------------");
                    for d in defs {
                        println!("{} | {} | {}", d.id, d.key, d.version);
                    }
                }
                Err(e) => eprintln!("Error listando definiciones: {}", e),
            },
            "3" => {
                let key = prompt("Clave del proceso: ")?;
                let bk = prompt("Business key (enter para vacío): ")?;
                let bk = if bk.trim().is_empty() { None } else { Some(bk.trim().to_string()) };
                match engine.runtime_service().start_process_instance_by_key(key.trim(), bk, Map::new()) {
                    Ok(pi) => println!("Instancia iniciada: {}", pi.id),
                    Err(e) => eprintln!("Error iniciando instancia: {}", e),
                }
            }
            "4" => match engine.runtime_service().process_instances(None) {
                Ok(list) => {
                    for pi in list {
                        println!("{} | {} | {}",
                                 pi.id,
                                 pi.proc_def_id.unwrap_or_else(|| "-".into()),
                                 pi.business_key.unwrap_or_else(|| "-".into()));
                    }
                }
                Err(e) => eprintln!("Error listando instancias: {}", e),
            },
            "5" => {
                let group = prompt("Grupo candidato (enter para todas): ")?;
                let query = if group.trim().is_empty() { TaskQuery::new() } else { TaskQuery::new().candidate_group(group.trim()) };
                match engine.task_service().tasks(query) {
                    Ok(tasks) => {
                        for t in tasks {
                            println!("{} | {} | {} | {}",
                                     t.id,
                                     t.name,
                                     t.proc_inst_id.unwrap_or_else(|| "-".into()),
                                     t.assignee.unwrap_or_else(|| "<sin asignar>".into()));
                        }
                    }
                    Err(e) => eprintln!("Error listando tareas: {}", e),
                }
            }
            "6" => {
                let id = prompt("Id de tarea: ")?;
                let user = prompt("Usuario: ")?;
                match engine.task_service().claim(id.trim(), user.trim()) {
                    Ok(t) => println!("Tarea {} asignada a {}", t.id, user.trim()),
                    Err(e) => eprintln!("Error reclamando tarea: {}", e),
                }
            }
            "7" => {
                let id = prompt("Id de tarea: ")?;
                let vars = prompt("Variables (objeto JSON, enter para ninguna): ")?;
                let vars = match parse_variables(&vars) {
                    Some(v) => v,
                    None => { eprintln!("JSON inválido"); continue; }
                };
                match engine.task_service().complete(id.trim(), vars) {
                    Ok(c) if c.process_ended => println!("Tarea completada; el proceso terminó"),
                    Ok(c) => println!("Tarea completada; siguiente: {}",
                                      c.next_task.map(|t| t.id).unwrap_or_else(|| "-".into())),
                    Err(e) => eprintln!("Error completando tarea: {}", e),
                }
            }
            "8" => {
                let id = prompt("Id de ejecución: ")?;
                let vars = prompt("Variables a fijar (objeto JSON, enter para solo ver): ")?;
                if !vars.trim().is_empty() {
                    let vars = match parse_variables(&vars) {
                        Some(v) => v,
                        None => { eprintln!("JSON inválido"); continue; }
                    };
                    if let Err(e) = engine.runtime_service().set_variables(id.trim(), vars) {
                        eprintln!("Error fijando variables: {}", e);
                        continue;
                    }
                }
                match engine.runtime_service().variables(id.trim()) {
                    Ok(v) => println!("{}", JsonValue::Object(v)),
                    Err(e) => eprintln!("Error leyendo variables: {}", e),
                }
            }
            "9" => {
                let id = prompt("Id de instancia a eliminar: ")?;
                let confirm = prompt(&format!("Confirma borrado de {}? escribir 'yes' para confirmar: ", id.trim()))?;
                if confirm.trim().to_lowercase() == "yes" {
                    match engine.runtime_service().delete_process_instance(id.trim(), "borrada desde la CLI") {
                        Ok(()) => println!("Instancia eliminada: {}", id.trim()),
                        Err(e) => eprintln!("Error eliminando instancia: {}", e),
                    }
                } else {
                    println!("Borrado cancelado");
                }
            }
            "10" => match engine.history_service().process_instances(None) {
                Ok(list) => {
                    for h in list {
                        let end = h.end_time.map(|t| t.to_rfc3339()).unwrap_or_else(|| "en curso".into());
                        println!("{} | fin: {} | motivo: {}",
                                 h.proc_inst_id,
                                 end,
                                 h.delete_reason.unwrap_or_else(|| "-".into()));
                        if let Ok(acts) = engine.history_service().activity_instances(&h.proc_inst_id) {
                            for a in acts {
                                println!("    {} ({})", a.activity_id, a.activity_type);
                            }
                        }
                    }
                }
                Err(e) => eprintln!("Error leyendo historia: {}", e),
            },
            "11" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    Ok(())
}

fn parse_variables(input: &str) -> Option<Map<String, JsonValue>> {
    if input.trim().is_empty() {
        return Some(Map::new());
    }
    match serde_json::from_str::<JsonValue>(input.trim()) {
        Ok(JsonValue::Object(map)) => Some(map),
        _ => None,
    }
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}
