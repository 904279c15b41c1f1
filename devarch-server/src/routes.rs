use warp::Filter;

use crate::handlers;
use crate::reject::handle_rejection;
use crate::state::AppState;

const BODY_LIMIT: u64 = 1024 * 1024;

fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone {
    warp::body::content_length_limit(BODY_LIMIT).and(warp::body::json())
}

/// The whole HTTP surface, with the rejection handler attached.
pub fn routes(
    state: AppState,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let list_stacks = warp::path!("stacks")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::stacks::list);

    let create_stack = warp::path!("stacks")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::stacks::create);

    let import = warp::path!("stacks" / "import")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::transfer::import);

    let stack_detail = warp::path!("stacks" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::stacks::detail);

    let stack_patch = warp::path!("stacks" / String)
        .and(warp::patch())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::stacks::patch);

    let stack_delete = warp::path!("stacks" / String)
        .and(warp::delete())
        .and(with_state(state.clone()))
        .and_then(handlers::stacks::soft_delete);

    let stack_enable = warp::path!("stacks" / String / "enable")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(handlers::stacks::enable);

    let stack_disable = warp::path!("stacks" / String / "disable")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(handlers::stacks::disable);

    let stack_restore = warp::path!("stacks" / String / "restore")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(handlers::stacks::restore);

    let stack_clone = warp::path!("stacks" / String / "clone")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::stacks::clone);

    let list_instances = warp::path!("stacks" / String / "instances")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::instances::list);

    let add_instance = warp::path!("stacks" / String / "instances")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::instances::add);

    let instance_detail = warp::path!("stacks" / String / "instances" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::instances::detail);

    let instance_remove = warp::path!("stacks" / String / "instances" / String)
        .and(warp::delete())
        .and(with_state(state.clone()))
        .and_then(handlers::instances::remove);

    let effective = warp::path!("stacks" / String / "instances" / String / "effective")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::ops::effective);

    let instance_logs = warp::path!("stacks" / String / "instances" / String / "logs")
        .and(warp::get())
        .and(warp::query())
        .and(with_state(state.clone()))
        .and_then(handlers::ops::logs);

    let instance_stats = warp::path!("stacks" / String / "instances" / String / "stats")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::ops::stats);

    let override_put = warp::path!("stacks" / String / "instances" / String / String)
        .and(warp::put())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::overrides::put);

    let override_delete = warp::path!("stacks" / String / "instances" / String / String)
        .and(warp::delete())
        .and(with_state(state.clone()))
        .and_then(handlers::overrides::delete);

    let compose_preview = warp::path!("stacks" / String / "compose")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::ops::compose_preview);

    let plan = warp::path!("stacks" / String / "plan")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(handlers::ops::plan);

    let apply = warp::path!("stacks" / String / "apply")
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(handlers::ops::apply);

    let export = warp::path!("stacks" / String / "export")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::transfer::export);

    let healthz = warp::path!("healthz")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::system::healthz);

    let doctor = warp::path!("doctor")
        .and(warp::get())
        .and(with_state(state))
        .and_then(handlers::system::doctor);

    list_stacks
        .or(create_stack)
        .or(import)
        .or(stack_enable)
        .or(stack_disable)
        .or(stack_restore)
        .or(stack_clone)
        .or(list_instances)
        .or(add_instance)
        .or(effective)
        .or(instance_logs)
        .or(instance_stats)
        .or(override_put)
        .or(override_delete)
        .or(instance_detail)
        .or(instance_remove)
        .or(compose_preview)
        .or(plan)
        .or(apply)
        .or(export)
        .or(stack_detail)
        .or(stack_patch)
        .or(stack_delete)
        .or(healthz)
        .or(doctor)
        .recover(handle_rejection)
}
